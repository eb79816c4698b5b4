use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::info;

use crate::models::ListingRecord;
use crate::scrapers::ScrapeError;

/// Where a batch landed on disk and how many rows it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub rows: usize,
}

/// Serialize a scraped batch to one timestamped CSV file under `output_dir`.
///
/// Rows are deduplicated on `source_id`: the last occurrence of an id wins,
/// emitted in first-seen order. An empty batch writes nothing.
pub fn export_csv(
    listings: &[ListingRecord],
    output_dir: &Path,
) -> Result<Option<ExportOutcome>, ScrapeError> {
    if listings.is_empty() {
        return Ok(None);
    }

    let mut unique: IndexMap<&str, &ListingRecord> = IndexMap::new();
    for record in listings {
        unique.insert(record.source_id.as_str(), record);
    }

    fs::create_dir_all(output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = output_dir.join(format!("fang_top_{timestamp}.csv"));

    let mut writer = csv::Writer::from_path(&path)?;
    for record in unique.values() {
        writer.serialize(record)?;
    }
    writer.flush()?;

    let rows = unique.len();
    info!(rows, path = %path.display(), "exported listing batch");
    Ok(Some(ExportOutcome { path, rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(source_id: &str, title: &str, price: Option<f64>) -> ListingRecord {
        ListingRecord {
            source_id: source_id.to_string(),
            title: title.to_string(),
            house_url: "https://esf.fang.com/chushou/1.htm".to_string(),
            layout: "2室1厅".to_string(),
            house_type: "2室".to_string(),
            area_sqm: Some(88.0),
            floor: "高层".to_string(),
            total_floors: Some(20),
            orientation: "南".to_string(),
            price_total_wan: price,
            unit_price: Some(45000.0),
            agent_name: "李雷".to_string(),
            agent_store_url: String::new(),
            agent_id: None,
            community: "某小区".to_string(),
            region: "海淀-中关村".to_string(),
            district_name: "海淀".to_string(),
            sub_district: "中关村".to_string(),
            address: "某小区 / 海淀-中关村".to_string(),
            tags: vec!["满五唯一".to_string(), "近地铁".to_string()],
            cover_image: String::new(),
            status: "available".to_string(),
            decoration: "精装".to_string(),
            build_year: 2010,
            description: "满五唯一 | 近地铁".to_string(),
            longitude: 116.4,
            latitude: 39.9,
            city: "北京".to_string(),
            data_source: "fang.com/top".to_string(),
            scraped_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = export_csv(&[], dir.path()).unwrap();
        assert!(outcome.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dedups_on_source_id_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let batch = vec![
            record("a", "房源甲", Some(300.0)),
            record("b", "房源乙", Some(400.0)),
            record("a", "房源甲", Some(310.0)),
        ];

        let outcome = export_csv(&batch, dir.path()).unwrap().unwrap();
        assert_eq!(outcome.rows, 2);

        let mut reader = csv::Reader::from_path(&outcome.path).unwrap();
        let rows: Vec<ListingRecord> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        // first-seen order, last occurrence's data
        assert_eq!(rows[0].source_id, "a");
        assert_eq!(rows[0].price_total_wan, Some(310.0));
        assert_eq!(rows[1].source_id, "b");
    }

    #[test]
    fn tags_round_trip_as_joined_cell() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = export_csv(&[record("a", "房源甲", None)], dir.path())
            .unwrap()
            .unwrap();

        let text = fs::read_to_string(&outcome.path).unwrap();
        assert!(text.contains("满五唯一, 近地铁"));

        let mut reader = csv::Reader::from_path(&outcome.path).unwrap();
        let rows: Vec<ListingRecord> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0].tags, vec!["满五唯一", "近地铁"]);
        assert_eq!(rows[0].price_total_wan, None);
    }
}
