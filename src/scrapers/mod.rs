pub mod export;
pub mod fang;
pub mod traits;

pub use export::ExportOutcome;
pub use fang::FangScraper;
pub use traits::ListingScraper;

use thiserror::Error;

/// Failures of the fetch/parse/export run. A fetch failure is fatal for the
/// whole run; individual listing nodes that fail to parse are skipped inside
/// `parse_listings` and never surface here.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("invalid pattern `{0}`")]
    Pattern(String),

    #[error("csv export failed: {0}")]
    Export(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
