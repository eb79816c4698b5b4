use crate::models::ListingRecord;
use crate::scrapers::ScrapeError;
use async_trait::async_trait;

/// Common trait for all listing scrapers.
/// This allows easy addition of new sources (Lianjia, Anjuke, etc) in the future
#[async_trait]
pub trait ListingScraper: Send + Sync {
    /// Fetch the source page and parse it into listing records
    async fn scrape(&self) -> Result<Vec<ListingRecord>, ScrapeError>;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
