//! On-disk crawl artifacts: the compressed page store, the per-domain run
//! directory layout, and crawl-state checkpoints.

mod cache;
pub mod layout;
pub mod page_store;
pub mod state;

pub use layout::AuditStateLayout;
pub use page_store::{CompressionStats, MigrationReport, PageStore, PageStoreConfig};
pub use state::{CrawlStateContainers, CrawlStateFile, JsonStateLoader, StateLoader};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An artifact exists but cannot be decoded.
    #[error("Corrupt page data for {url}: {reason}")]
    Corrupt { url: String, reason: String },
}

impl PageStoreError {
    pub fn corrupt(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
