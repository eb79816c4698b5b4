use std::sync::Arc;

use anyhow::Context;
use fang_ingest::config::Config;
use fang_ingest::importer::ListingImporter;
use fang_ingest::scrapers::FangScraper;
use fang_ingest::store::PgStore;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cfg = Config::from_env()?;
    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());

    match command.as_str() {
        "fetch" => fetch(&cfg).await?,
        "import" => import(&cfg).await?,
        "run" => {
            fetch(&cfg).await?;
            import(&cfg).await?;
        }
        other => anyhow::bail!("unknown command `{other}` (expected fetch, import or run)"),
    }

    Ok(())
}

async fn fetch(cfg: &Config) -> anyhow::Result<()> {
    info!("starting fang.com scrape run");
    let scraper = FangScraper::new(cfg.scraper.clone())?;
    let report = scraper.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn import(cfg: &Config) -> anyhow::Result<()> {
    let database_url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for import")?;

    info!("starting listing import run");
    let store = Arc::new(PgStore::connect(database_url).await?);
    let importer = ListingImporter::new(store, cfg.importer.clone());
    let summary = importer.run().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
