//! Configuration for Agenda Sync
//!
//! CLI arguments and environment variable handling using clap. Each
//! component gets its own config struct; `Args` converts into them.

use std::time::Duration;

use clap::Parser;

use crate::chain::{ContractAddresses, PollerConfig, RetryPolicy};
use crate::metadata::MetadataStoreConfig;
use crate::sync::{BatchConfig, PaginationConfig, SyncConfig};
use crate::types::{Result, SyncError};

/// Agenda Sync - governance agenda cache daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "agenda-sync")]
#[command(about = "Sync, cache and paginate on-chain governance agendas")]
pub struct Args {
    /// Ledger RPC configuration
    #[command(flatten)]
    pub rpc: RpcArgs,

    /// Agenda manager contract address
    #[arg(long, env = "AGENDA_MANAGER_ADDRESS")]
    pub agenda_manager: String,

    /// Committee contract address
    #[arg(long, env = "COMMITTEE_ADDRESS")]
    pub committee: String,

    /// Metadata document base URL (`{base}/{network}/agenda-{id}.json`)
    #[arg(long, env = "METADATA_BASE_URL")]
    pub metadata_base_url: String,

    /// Metadata API URL serving `/metadata-range`
    #[arg(long, env = "METADATA_API_URL")]
    pub metadata_api_url: String,

    /// Network name used in metadata paths
    #[arg(long, env = "NETWORK", default_value = "mainnet")]
    pub network: String,

    /// Agendas per page
    #[arg(long, env = "PAGE_SIZE", default_value = "10")]
    pub page_size: u32,

    /// Ledger reads per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "10")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[arg(long, env = "BATCH_DELAY_MS", default_value = "100")]
    pub batch_delay_ms: u64,

    /// Metadata existence refresh interval in seconds
    #[arg(long, env = "METADATA_REFRESH_SECS", default_value = "300")]
    pub metadata_refresh_secs: u64,

    /// Concurrent metadata document fetches
    #[arg(long, env = "METADATA_CONCURRENCY", default_value = "8")]
    pub metadata_concurrency: usize,

    /// Event poll interval in seconds
    #[arg(long, env = "EVENT_POLL_SECS", default_value = "12")]
    pub event_poll_secs: u64,

    /// Maximum blocks per log query
    #[arg(long, env = "LOG_CHUNK_BLOCKS", default_value = "2000")]
    pub log_chunk_blocks: u64,

    /// First block to scan for events (defaults to the current head)
    #[arg(long, env = "START_BLOCK")]
    pub start_block: Option<u64>,

    /// Quorum refresh debounce after member changes, in milliseconds
    #[arg(long, env = "QUORUM_DEBOUNCE_MS", default_value = "2000")]
    pub quorum_debounce_ms: u64,

    /// Load every page after the first one at startup
    #[arg(long, env = "BACKFILL_ALL", default_value = "false")]
    pub backfill_all: bool,

    /// Snapshot summary log interval in seconds (0 disables)
    #[arg(long, env = "SUMMARY_SECS", default_value = "60")]
    pub summary_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// Ledger RPC configuration
#[derive(Parser, Debug, Clone)]
pub struct RpcArgs {
    /// Comma-separated JSON-RPC URLs, in failover order
    #[arg(long = "rpc-urls", env = "RPC_URLS", value_delimiter = ',')]
    pub urls: Vec<String>,

    /// Attempts per endpoint before failing over
    #[arg(long = "rpc-attempts", env = "RPC_ATTEMPTS", default_value = "3")]
    pub attempts: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long = "rpc-initial-backoff-ms", env = "RPC_INITIAL_BACKOFF_MS", default_value = "200")]
    pub initial_backoff_ms: u64,

    /// Maximum retry backoff in milliseconds
    #[arg(long = "rpc-max-backoff-ms", env = "RPC_MAX_BACKOFF_MS", default_value = "2000")]
    pub max_backoff_ms: u64,

    /// Request timeout in milliseconds (RPC and metadata)
    #[arg(long = "request-timeout-ms", env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc_urls().is_empty() {
            return Err(SyncError::Config("RPC_URLS must name at least one endpoint".to_string()));
        }
        if let Some(url) = self
            .rpc_urls()
            .into_iter()
            .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
        {
            return Err(SyncError::Config(format!("RPC URL must be http(s): {}", url)));
        }

        for (name, address) in [
            ("AGENDA_MANAGER_ADDRESS", &self.agenda_manager),
            ("COMMITTEE_ADDRESS", &self.committee),
        ] {
            if !is_address(address) {
                return Err(SyncError::Config(
                    format!("{} is not a 20-byte hex address: {}", name, address),
                ));
            }
        }

        if self.page_size == 0 {
            return Err(SyncError::Config("PAGE_SIZE must be greater than zero".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("BATCH_SIZE must be greater than zero".to_string()));
        }
        if self.rpc.attempts == 0 {
            return Err(SyncError::Config("RPC_ATTEMPTS must be at least 1".to_string()));
        }
        if self.rpc.initial_backoff_ms > self.rpc.max_backoff_ms {
            return Err(SyncError::Config(
                "RPC_INITIAL_BACKOFF_MS must be less than or equal to RPC_MAX_BACKOFF_MS".to_string(),
            ));
        }
        if self.log_chunk_blocks == 0 {
            return Err(SyncError::Config("LOG_CHUNK_BLOCKS must be greater than zero".to_string()));
        }
        if self.metadata_refresh_secs == 0 {
            return Err(SyncError::Config(
                "METADATA_REFRESH_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Trimmed, non-empty RPC URLs
    pub fn rpc_urls(&self) -> Vec<String> {
        self.rpc
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rpc.attempts,
            initial_backoff: Duration::from_millis(self.rpc.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.rpc.max_backoff_ms),
        }
    }

    pub fn contracts(&self) -> ContractAddresses {
        ContractAddresses {
            agenda_manager: self.agenda_manager.to_lowercase(),
            committee: self.committee.to_lowercase(),
        }
    }

    pub fn metadata_store_config(&self) -> MetadataStoreConfig {
        MetadataStoreConfig {
            base_url: self.metadata_base_url.clone(),
            network: self.network.clone(),
            timeout: self.request_timeout(),
            concurrency: self.metadata_concurrency.max(1),
            ..Default::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.event_poll_secs.max(1)),
            max_block_span: self.log_chunk_blocks,
            start_block: self.start_block,
            ..Default::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            pagination: PaginationConfig {
                page_size: self.page_size,
            },
            batch: BatchConfig {
                batch_size: self.batch_size,
                batch_delay: Duration::from_millis(self.batch_delay_ms),
            },
            metadata_refresh_interval: Duration::from_secs(self.metadata_refresh_secs),
            quorum_debounce: Duration::from_millis(self.quorum_debounce_ms),
            ..Default::default()
        }
    }
}

fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
