//! Off-chain agenda metadata
//!
//! - [`store`]: fetches metadata documents (content)
//! - [`cache`]: tracks which ids have metadata at all (existence index)

pub mod cache;
pub mod document;
pub mod store;

pub use cache::{
    ExistenceIndex, ExistenceSnapshot, ExistenceSource, HttpExistenceSource, MetadataCache,
};
pub use document::AgendaMetadataDocument;
pub use store::{HttpMetadataStore, MetadataSource, MetadataStoreConfig};

/// Metadata transport errors. "Not found" is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Metadata server returned HTTP {status}")]
    Server { status: u16 },

    #[error("Invalid metadata document: {0}")]
    InvalidDocument(String),

    /// Range endpoint answered with `success: false`
    #[error("Metadata range query rejected")]
    RangeRejected,
}

impl From<reqwest::Error> for MetadataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
