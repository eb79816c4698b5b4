pub mod normalize;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ImportConfig;
use crate::models::{
    Agent, District, HouseFields, HouseKey, ImportStats, ImportSummary, NewAgent, NewDistrict,
};
use crate::store::{Store, StoreError, StoreTx};

const PHONE_PREFIXES: [&str; 12] = [
    "131", "132", "133", "134", "135", "136", "137", "138", "139", "150", "151", "152",
];
const MAX_PHONE_ATTEMPTS: usize = 512;

const DEFAULT_DISTRICT_NAME: &str = "未知区域";
const DEFAULT_FLOOR: &str = "未知楼层";
const DEFAULT_AGENT_USERNAME: &str = "beijing_agent";
const DEFAULT_AGENT_NAME: &str = "北京经纪人";
const AGENT_COMPANY: &str = "北京经纪联盟";
const FALLBACK_COVER: &str = "houses/images/shutterstock_1722002524.jpg";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("phone number space exhausted after {0} attempts")]
    PhoneSpaceExhausted(usize),
}

/// Raw CSV row as produced by the scraper export. Everything is optional
/// text; coercion to typed values happens in `normalize` so that garbage in
/// any one cell degrades to a default instead of failing the row.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRow {
    source_id: Option<String>,
    title: Option<String>,
    house_url: Option<String>,
    layout: Option<String>,
    house_type: Option<String>,
    area_sqm: Option<String>,
    floor: Option<String>,
    total_floors: Option<String>,
    orientation: Option<String>,
    price_total_wan: Option<String>,
    unit_price: Option<String>,
    agent_name: Option<String>,
    region: Option<String>,
    district_name: Option<String>,
    address: Option<String>,
    tags: Option<String>,
    status: Option<String>,
    decoration: Option<String>,
    build_year: Option<String>,
    description: Option<String>,
    longitude: Option<String>,
    latitude: Option<String>,
    data_source: Option<String>,
}

enum RowOutcome {
    Created,
    Updated,
}

/// Reads scraped CSV batches from the data directory and reconciles them
/// into the canonical store, one transaction per row.
pub struct ListingImporter {
    store: Arc<dyn Store>,
    cfg: ImportConfig,
    placeholder_images: Vec<String>,
    rng: Mutex<StdRng>,
}

impl ListingImporter {
    pub fn new(store: Arc<dyn Store>, cfg: ImportConfig) -> Self {
        Self::with_rng(store, cfg, StdRng::from_entropy())
    }

    /// Construct with a caller-supplied RNG. The phone and cover-image draws
    /// all come from it.
    pub fn with_rng(store: Arc<dyn Store>, cfg: ImportConfig, rng: StdRng) -> Self {
        let placeholder_images = load_placeholder_images(&cfg.media_root);
        Self {
            store,
            cfg,
            placeholder_images,
            rng: Mutex::new(rng),
        }
    }

    /// Import every CSV file in the configured data directory. The
    /// scheduler-facing entry point; never fails, all faults fold into the
    /// returned summary.
    pub async fn run(&self) -> ImportSummary {
        let data_dir = self.cfg.data_dir.clone();
        self.import_all(&data_dir).await
    }

    pub async fn import_all(&self, dir: &Path) -> ImportSummary {
        if !dir.exists() {
            info!(dir = %dir.display(), "data directory does not exist, skipping import");
            return ImportSummary::default();
        }

        let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file() && path.extension().and_then(OsStr::to_str) == Some("csv")
                })
                .collect(),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "failed to scan data directory");
                return ImportSummary::default();
            }
        };
        files.sort();

        let mut results = Vec::with_capacity(files.len());
        for path in &files {
            results.push(self.process_file(path).await);
        }

        let summary = ImportSummary::from_files(results);
        info!(
            created = summary.total_created,
            updated = summary.total_updated,
            errors = summary.total_errors,
            "listing import completed"
        );
        summary
    }

    async fn process_file(&self, path: &Path) -> ImportStats {
        let mut stats = ImportStats::new(path.display().to_string());
        info!(path = %path.display(), "processing listing file");

        let rows = match read_rows(path) {
            Ok(rows) => rows,
            Err(err) => {
                stats.errors += 1;
                stats
                    .error_messages
                    .push(format!("failed to read {}: {err}", path.display()));
                error!(path = %path.display(), %err, "failed to read listing file");
                return stats;
            }
        };

        for row in &rows {
            let has_title = row
                .title
                .as_deref()
                .map(str::trim)
                .is_some_and(|t| !t.is_empty());
            if !has_title {
                stats.skipped += 1;
                continue;
            }

            match self.import_row(row).await {
                Ok(RowOutcome::Created) => stats.created += 1,
                Ok(RowOutcome::Updated) => stats.updated += 1,
                Err(err) => {
                    stats.errors += 1;
                    stats.error_messages.push(err.to_string());
                    error!(path = %path.display(), %err, "failed to import row");
                }
            }
        }

        self.archive_file(path);
        stats
    }

    /// One row, one transaction: everything commits together or not at all.
    async fn import_row(&self, row: &RawRow) -> Result<RowOutcome, ImportError> {
        let mut tx = self.store.begin().await?;
        match self.import_row_tx(tx.as_mut(), row).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    async fn import_row_tx(
        &self,
        tx: &mut (dyn StoreTx + '_),
        row: &RawRow,
    ) -> Result<RowOutcome, ImportError> {
        let district = self.resolve_district(tx, row).await?;
        let agent = self.resolve_agent(tx, row).await?;

        let (key, fields) = self.build_house(row, &district, agent.map(|a| a.id));

        let (outcome, house_id) = match tx.find_house(&key).await? {
            Some(existing) => {
                tx.update_house(existing.id, fields.clone()).await?;
                debug!(house = %key.title, id = existing.id, "updated house");
                (RowOutcome::Updated, existing.id)
            }
            None => {
                let house = tx.create_house(key, fields.clone()).await?;
                debug!(house = %house.title, id = house.id, "created house");
                (RowOutcome::Created, house.id)
            }
        };

        self.ensure_house_image(tx, house_id, &fields.cover_image)
            .await?;

        Ok(outcome)
    }

    /// District by the leading segment of the hyphen-delimited region.
    /// Existing rows get their city corrected and an empty description
    /// backfilled; nothing is ever deleted.
    async fn resolve_district(
        &self,
        tx: &mut (dyn StoreTx + '_),
        row: &RawRow,
    ) -> Result<District, ImportError> {
        let raw = row
            .district_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                row.region
                    .as_deref()
                    .map(str::trim)
                    .filter(|region| !region.is_empty())
            })
            .unwrap_or(DEFAULT_DISTRICT_NAME);
        let name = raw.split('-').next().unwrap_or(raw).trim().to_string();
        let description = row.region.clone().unwrap_or_default();

        match tx.find_district(&name).await? {
            Some(mut district) => {
                let mut changed = false;
                if district.city != self.cfg.default_city {
                    district.city = self.cfg.default_city.clone();
                    changed = true;
                }
                if district.description.is_empty() && !description.is_empty() {
                    district.description = description;
                    changed = true;
                }
                if changed {
                    tx.update_district(&district).await?;
                }
                Ok(district)
            }
            None => {
                let district = tx
                    .create_district(NewDistrict {
                        name,
                        city: self.cfg.default_city.clone(),
                        description,
                    })
                    .await?;
                debug!(district = %district.name, id = district.id, "created district");
                Ok(district)
            }
        }
    }

    /// Agent by display name, then by username (backfilling the display
    /// name); otherwise a placeholder agent is synthesized.
    async fn resolve_agent(
        &self,
        tx: &mut (dyn StoreTx + '_),
        row: &RawRow,
    ) -> Result<Option<Agent>, ImportError> {
        let agent_name = row.agent_name.as_deref().map(str::trim).unwrap_or("");
        if agent_name.is_empty() {
            return self.default_agent(tx).await;
        }

        if let Some(agent) = tx.find_agent_by_real_name(agent_name).await? {
            return Ok(Some(agent));
        }

        if let Some(mut agent) = tx.find_agent_by_username(agent_name).await? {
            if agent.real_name.is_empty() {
                agent.real_name = agent_name.to_string();
                tx.update_agent(&agent).await?;
            }
            return Ok(Some(agent));
        }

        let mut username = normalize::sanitize_username(agent_name);
        if tx.username_exists(&username).await? {
            username = format!("{username}_{}", Utc::now().format("%H%M%S%6f"));
        }

        let phone = self.generate_unique_phone(tx).await?;
        let agent = tx
            .create_agent(NewAgent {
                username,
                phone,
                real_name: agent_name.to_string(),
                company: AGENT_COMPANY.to_string(),
                is_verified: true,
            })
            .await?;
        debug!(agent = %agent.real_name, id = agent.id, "created agent");
        Ok(Some(agent))
    }

    async fn default_agent(
        &self,
        tx: &mut (dyn StoreTx + '_),
    ) -> Result<Option<Agent>, ImportError> {
        if let Some(agent) = tx.first_agent().await? {
            return Ok(Some(agent));
        }

        let phone = self.generate_unique_phone(tx).await?;
        let agent = tx
            .create_agent(NewAgent {
                username: DEFAULT_AGENT_USERNAME.to_string(),
                phone,
                real_name: DEFAULT_AGENT_NAME.to_string(),
                company: AGENT_COMPANY.to_string(),
                is_verified: true,
            })
            .await?;
        Ok(Some(agent))
    }

    /// Uniform prefix + 8 random digits, retried against the store until
    /// unique. At most `MAX_PHONE_ATTEMPTS` draws; a saturated number space
    /// fails the row.
    async fn generate_unique_phone(
        &self,
        tx: &mut (dyn StoreTx + '_),
    ) -> Result<String, ImportError> {
        for _ in 0..MAX_PHONE_ATTEMPTS {
            let phone = {
                let mut rng = self.rng();
                let prefix = PHONE_PREFIXES
                    .choose(&mut *rng)
                    .unwrap_or(&PHONE_PREFIXES[0]);
                let suffix: String = (0..8)
                    .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                    .collect();
                format!("{prefix}{suffix}")
            };
            if !tx.phone_exists(&phone).await? {
                return Ok(phone);
            }
        }
        Err(ImportError::PhoneSpaceExhausted(MAX_PHONE_ATTEMPTS))
    }

    fn build_house(
        &self,
        row: &RawRow,
        district: &District,
        agent_id: Option<i64>,
    ) -> (HouseKey, HouseFields) {
        let title = row
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let address = normalize::truncate_chars(
            row.address.as_deref().map(str::trim).unwrap_or_default(),
            200,
        );

        let house_type_source = row
            .house_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or(row.layout.as_deref());
        let orientation = {
            let stripped = normalize::normalize_orientation(row.orientation.as_deref());
            if stripped.is_empty() {
                normalize::DEFAULT_ORIENTATION.to_string()
            } else {
                stripped
            }
        };
        let floor = normalize::truncate_chars(
            row.floor
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_FLOOR),
            20,
        );

        let key = HouseKey {
            title,
            district_id: district.id,
            address,
        };
        let fields = HouseFields {
            price: normalize::to_decimal(row.price_total_wan.as_deref(), 2),
            unit_price: normalize::to_decimal(row.unit_price.as_deref(), 2),
            area: normalize::to_decimal(row.area_sqm.as_deref(), 2),
            house_type: normalize::normalize_house_type(house_type_source),
            floor,
            total_floors: normalize::to_int(row.total_floors.as_deref(), Some(1)).unwrap_or(1),
            orientation,
            decoration: normalize::normalize_decoration(row.decoration.as_deref()),
            build_year: normalize::to_int(row.build_year.as_deref(), None),
            longitude: normalize::to_decimal(row.longitude.as_deref(), 7),
            latitude: normalize::to_decimal(row.latitude.as_deref(), 7),
            description: normalize::build_description(
                row.description.as_deref(),
                row.data_source.as_deref(),
                row.house_url.as_deref(),
                row.source_id.as_deref(),
                row.tags.as_deref(),
            ),
            cover_image: self.choose_cover_image(),
            status: normalize::normalize_status(row.status.as_deref()),
            agent_id,
            views: 0,
        };

        (key, fields)
    }

    fn choose_cover_image(&self) -> String {
        let mut rng = self.rng();
        self.placeholder_images
            .choose(&mut *rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_COVER.to_string())
    }

    /// Every house leaves the importer with at least one image row; the
    /// cover path fills the order-0 slot unless it is already there.
    async fn ensure_house_image(
        &self,
        tx: &mut (dyn StoreTx + '_),
        house_id: i64,
        cover_image: &str,
    ) -> Result<(), ImportError> {
        let normalized = cover_image
            .strip_prefix(&self.cfg.media_url)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(cover_image);

        if !tx.house_image_exists(house_id, normalized).await? {
            tx.add_house_image(house_id, normalized, 0).await?;
        }
        Ok(())
    }

    /// Move a fully processed file into the archive subdirectory. Failure is
    /// logged and otherwise ignored; it never affects the statistics.
    fn archive_file(&self, path: &Path) {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let processed = parent.join("processed");

        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("listings");
        let extension = path.extension().and_then(OsStr::to_str).unwrap_or("csv");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let destination = processed.join(format!("{stem}_{timestamp}.{extension}"));

        let moved = fs::create_dir_all(&processed).and_then(|_| fs::rename(path, &destination));
        match moved {
            Ok(()) => info!(
                from = %path.display(),
                to = %destination.display(),
                "archived listing file"
            ),
            Err(err) => warn!(path = %path.display(), %err, "failed to archive listing file"),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_rows(path: &Path) -> Result<Vec<RawRow>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}

fn load_placeholder_images(media_root: &Path) -> Vec<String> {
    let images_dir = media_root.join("houses").join("images");
    let Ok(entries) = fs::read_dir(&images_dir) else {
        return vec![FALLBACK_COVER.to_string()];
    };

    let mut images: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.strip_prefix(media_root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    images.sort();

    if images.is_empty() {
        vec![FALLBACK_COVER.to_string()]
    } else {
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn importer(store: Arc<MemStore>) -> ListingImporter {
        let cfg = ImportConfig {
            data_dir: PathBuf::from("/nonexistent"),
            media_root: PathBuf::from("/nonexistent"),
            ..ImportConfig::default()
        };
        ListingImporter::with_rng(store, cfg, StdRng::seed_from_u64(42))
    }

    #[tokio::test]
    async fn generated_phones_avoid_existing_ones() {
        let store = Arc::new(MemStore::new());
        let imp = importer(store.clone());

        let mut tx = store.begin().await.unwrap();
        let mut seen = Vec::new();
        for i in 0..50 {
            let phone = imp.generate_unique_phone(tx.as_mut()).await.unwrap();
            assert_eq!(phone.len(), 11);
            assert!(PHONE_PREFIXES.contains(&&phone[..3]));
            assert!(!seen.contains(&phone));
            tx.create_agent(NewAgent {
                username: format!("agent_{i}"),
                phone: phone.clone(),
                real_name: format!("经纪人{i}"),
                company: AGENT_COMPANY.to_string(),
                is_verified: true,
            })
            .await
            .unwrap();
            seen.push(phone);
        }
    }

    #[test]
    fn placeholder_pool_falls_back_when_media_missing() {
        let images = load_placeholder_images(Path::new("/does/not/exist"));
        assert_eq!(images, vec![FALLBACK_COVER.to_string()]);
    }

    #[test]
    fn placeholder_pool_lists_media_files() {
        let media = tempfile::tempdir().unwrap();
        let images_dir = media.path().join("houses").join("images");
        fs::create_dir_all(&images_dir).unwrap();
        fs::write(images_dir.join("b.jpg"), b"x").unwrap();
        fs::write(images_dir.join("a.jpg"), b"x").unwrap();

        let images = load_placeholder_images(media.path());
        assert_eq!(
            images,
            vec![
                "houses/images/a.jpg".to_string(),
                "houses/images/b.jpg".to_string()
            ]
        );
    }
}
