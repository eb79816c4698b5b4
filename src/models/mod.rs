use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One scraped listing, as exchanged between the fetcher and the importer.
///
/// Field order matches the CSV column order. Numeric fields the source page
/// failed to yield stay absent (`None`) rather than being coerced to zero;
/// the importer applies its own defaults at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub source_id: String,
    pub title: String,
    pub house_url: String,
    pub layout: String,
    pub house_type: String,
    pub area_sqm: Option<f64>,
    pub floor: String,
    pub total_floors: Option<u32>,
    pub orientation: String,
    pub price_total_wan: Option<f64>,
    pub unit_price: Option<f64>,
    pub agent_name: String,
    pub agent_store_url: String,
    pub agent_id: Option<String>,
    pub community: String,
    pub region: String,
    pub district_name: String,
    pub sub_district: String,
    pub address: String,
    #[serde(serialize_with = "join_tags", deserialize_with = "split_tags")]
    pub tags: Vec<String>,
    pub cover_image: String,
    pub status: String,
    pub decoration: String,
    pub build_year: i32,
    pub description: String,
    pub longitude: f64,
    pub latitude: f64,
    pub city: String,
    pub data_source: String,
    pub scraped_at: DateTime<Utc>,
}

/// Tags travel as a single ", "-joined CSV cell.
fn join_tags<S: Serializer>(tags: &Vec<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&tags.join(", "))
}

fn split_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw
        .split(',')
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect())
}

/// A named area within the city. Unique by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct District {
    pub id: i64,
    pub name: String,
    pub city: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewDistrict {
    pub name: String,
    pub city: String,
    pub description: String,
}

/// The agent subset of the platform's user table (`role = 'agent'`).
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: i64,
    pub username: String,
    pub phone: String,
    pub real_name: String,
    pub company: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub username: String,
    pub phone: String,
    pub real_name: String,
    pub company: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HouseStatus {
    Available,
    Sold,
    Reserved,
}

impl HouseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HouseStatus::Available => "available",
            HouseStatus::Sold => "sold",
            HouseStatus::Reserved => "reserved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(HouseStatus::Available),
            "sold" => Some(HouseStatus::Sold),
            "reserved" => Some(HouseStatus::Reserved),
            _ => None,
        }
    }
}

/// Natural key the importer dedups houses on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HouseKey {
    pub title: String,
    pub district_id: i64,
    pub address: String,
}

/// Canonical listing entity.
#[derive(Debug, Clone)]
pub struct House {
    pub id: i64,
    pub title: String,
    pub district_id: i64,
    pub address: String,
    pub fields: HouseFields,
}

impl House {
    pub fn key(&self) -> HouseKey {
        HouseKey {
            title: self.title.clone(),
            district_id: self.district_id,
            address: self.address.clone(),
        }
    }
}

/// Everything on a house that is recomputed on each import (the non-key
/// columns). An update overwrites all of these in place.
#[derive(Debug, Clone)]
pub struct HouseFields {
    pub price: Decimal,
    pub unit_price: Decimal,
    pub area: Decimal,
    pub house_type: String,
    pub floor: String,
    pub total_floors: i32,
    pub orientation: String,
    pub decoration: String,
    pub build_year: Option<i32>,
    pub longitude: Decimal,
    pub latitude: Decimal,
    pub description: String,
    pub cover_image: String,
    pub status: HouseStatus,
    pub agent_id: Option<i64>,
    pub views: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseImage {
    pub id: i64,
    pub house_id: i64,
    pub image: String,
    pub order: i32,
}

/// Result of one scheduler-triggered scrape run.
#[derive(Debug, Serialize)]
pub struct ScrapeRunReport {
    pub count: usize,
    pub output_path: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-file import statistics.
#[derive(Debug, Default, Serialize)]
pub struct ImportStats {
    pub file: String,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
}

impl ImportStats {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }
}

/// Aggregate over all files of one import run.
#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub files: Vec<ImportStats>,
    pub total_created: usize,
    pub total_updated: usize,
    pub total_errors: usize,
}

impl ImportSummary {
    pub fn from_files(files: Vec<ImportStats>) -> Self {
        let total_created = files.iter().map(|s| s.created).sum();
        let total_updated = files.iter().map(|s| s.updated).sum();
        let total_errors = files.iter().map(|s| s.errors).sum();
        Self {
            files,
            total_created,
            total_updated,
            total_errors,
        }
    }
}
