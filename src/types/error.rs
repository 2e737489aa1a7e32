//! Error types for the agenda sync engine
//!
//! Pattern follows the gateway error enum: one flat `thiserror` enum with
//! `From` conversions from each layer's own error type.

use crate::chain::RpcError;
use crate::metadata::MetadataError;

/// Main error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Ledger read failed after retries and endpoint failover
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Metadata store could not be reached (absence is never an error)
    #[error("Network error: {0}")]
    Network(String),

    /// Ledger returned data that could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Event transport failure
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid page: {0}")]
    InvalidPage(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation stopped by a cancellation signal
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether this error is a per-record problem that a batch can drop
    /// without failing the whole range
    pub fn is_record_local(&self) -> bool {
        match self {
            Self::Decode(_) => true,
            Self::Rpc(e) => e.is_decode(),
            _ => false,
        }
    }
}

impl From<MetadataError> for SyncError {
    fn from(err: MetadataError) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
