//! Sync pipeline: batch loading, pagination, event application
//!
//! - [`batch`]: range loads from the ledger, merged with metadata
//! - [`pagination`]: the materialized id-descending list
//! - [`watcher`]: ledger notifications applied as upserts
//! - [`context`]: owns all of the above for one ledger/network pair

pub mod batch;
pub mod context;
pub mod debounce;
pub mod pagination;
pub mod quorum;
pub mod watcher;

pub use batch::{BatchConfig, BatchFetcher};
pub use context::{SyncConfig, SyncContext};
pub use debounce::Debouncer;
pub use pagination::{page_range, AgendaSnapshot, PageLoad, PaginationConfig, PaginationStore};
pub use quorum::QuorumTracker;
pub use watcher::{AgendaEventHandler, EventHandler, EventWatcher, WatchHandle};
