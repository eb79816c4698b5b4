use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// City every scraped/imported row is anchored to.
pub const DEFAULT_CITY: &str = "北京";

pub const FANG_TOP_URL: &str = "https://esf.fang.com/top/";

/// Settings for the listing fetcher.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub source_url: String,
    pub output_dir: PathBuf,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub city: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            source_url: FANG_TOP_URL.to_string(),
            output_dir: PathBuf::from("data"),
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(20),
            city: DEFAULT_CITY.to_string(),
        }
    }
}

/// Settings for the batch importer.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub data_dir: PathBuf,
    pub media_root: PathBuf,
    pub media_url: String,
    pub default_city: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            media_root: PathBuf::from("media"),
            media_url: "/media/".to_string(),
            default_city: DEFAULT_CITY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub importer: ImportConfig,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));

        let scraper = ScraperConfig {
            source_url: env::var("FANG_TOP_URL").unwrap_or_else(|_| FANG_TOP_URL.into()),
            output_dir: data_dir.clone(),
            ..ScraperConfig::default()
        };

        let importer = ImportConfig {
            data_dir,
            media_root: PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".into())),
            ..ImportConfig::default()
        };

        Ok(Self {
            scraper,
            importer,
            database_url: env::var("DATABASE_URL").ok(),
        })
    }
}
