//! Sync Context - owns every piece of cache state and wires the stages
//!
//! ```text
//! ChainReader ──► BatchFetcher ──► PaginationStore ──► snapshot()
//!      ▲               ▲                 ▲
//!      │         MetadataStore           │ upsert
//!      │         MetadataCache ◄─ total  │
//!      └──────── EventWatcher ───────────┘
//! ```
//!
//! Nothing here is global: build one context per ledger/network pair,
//! [`start`](SyncContext::start) it, and [`shutdown`](SyncContext::shutdown)
//! it when done.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::{BatchConfig, BatchFetcher};
use super::pagination::{AgendaSnapshot, PageLoad, PaginationConfig, PaginationStore};
use super::quorum::QuorumTracker;
use super::watcher::{AgendaEventHandler, EventWatcher, WatchHandle};
use crate::agenda::{derive_phase, AgendaRecord, LifecyclePhase};
use crate::chain::{EventSource, LedgerReader};
use crate::metadata::{ExistenceSource, MetadataCache, MetadataSource};
use crate::types::{Result, SyncError};

/// Engine-level configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub pagination: PaginationConfig,
    pub batch: BatchConfig,
    /// Existence index refresh period
    pub metadata_refresh_interval: Duration,
    /// Quiet period before a quorum re-read after member changes
    pub quorum_debounce: Duration,
    /// Retry pause while `backfill_all` waits on another load
    pub backfill_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pagination: PaginationConfig::default(),
            batch: BatchConfig::default(),
            metadata_refresh_interval: Duration::from_secs(300),
            quorum_debounce: Duration::from_secs(2),
            backfill_retry_delay: Duration::from_millis(100),
        }
    }
}

pub struct SyncContext {
    config: SyncConfig,
    fetcher: Arc<BatchFetcher>,
    pagination: Arc<PaginationStore>,
    metadata: Arc<MetadataCache>,
    quorum: Arc<QuorumTracker>,
    watcher: EventWatcher,
    cancel: CancellationToken,
    watch: Mutex<Option<WatchHandle>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncContext {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        metadata: Arc<dyn MetadataSource>,
        existence: Arc<dyn ExistenceSource>,
        events: Arc<dyn EventSource>,
        config: SyncConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let fetcher = Arc::new(BatchFetcher::new(
            Arc::clone(&ledger),
            metadata,
            config.batch.clone(),
        ));
        let cache = Arc::new(MetadataCache::new(existence));
        let pagination = Arc::new(PaginationStore::new(
            Arc::clone(&fetcher),
            Arc::clone(&cache),
            config.pagination.clone(),
            cancel.child_token(),
        ));
        let quorum = Arc::new(QuorumTracker::new(ledger, config.quorum_debounce));

        Self {
            config,
            fetcher,
            pagination,
            metadata: cache,
            quorum,
            watcher: EventWatcher::new(events),
            cancel,
            watch: Mutex::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the event watcher and the metadata refresh task. Calling it
    /// again while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut watch = self.watch.lock().await;
        if watch.is_some() {
            debug!("Sync context already started");
            return Ok(());
        }

        let handler = Arc::new(AgendaEventHandler::new(
            Arc::clone(&self.pagination),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.metadata),
            Arc::clone(&self.quorum),
        ));
        *watch = Some(self.watcher.start(handler).await?);

        let task = Arc::clone(&self.metadata).spawn_refresh_task(
            self.pagination.subscribe_total(),
            self.config.metadata_refresh_interval,
            self.cancel.child_token(),
        );
        *self.refresh_task.lock().await = Some(task);

        info!(
            page_size = self.pagination.page_size(),
            refresh_secs = self.config.metadata_refresh_interval.as_secs(),
            "Sync context started"
        );
        Ok(())
    }

    /// Stop every background task. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.quorum.cancel_pending();

        if let Some(watch) = self.watch.lock().await.take() {
            watch.shutdown().await;
        }
        if let Some(task) = self.refresh_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Metadata refresh task ended abnormally");
            }
        }
        info!("Sync context shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn snapshot(&self) -> AgendaSnapshot {
        self.pagination.snapshot()
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more()
    }

    pub fn remaining_count(&self) -> u64 {
        self.pagination.remaining_count()
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Memory first, then a direct ledger read. A direct read is not
    /// added to the materialized list.
    pub async fn get_agenda(&self, id: u64) -> Result<AgendaRecord> {
        if let Some(record) = self.pagination.get(id) {
            return Ok(record);
        }
        debug!(id, "Agenda not materialized, reading directly");
        self.fetcher.load_one(id, None).await
    }

    /// Committee quorum, read on first use
    pub async fn quorum(&self) -> Result<u64> {
        self.quorum.get().await
    }

    /// Lifecycle phase of `id` at unix time `now`
    pub async fn phase_of(&self, id: u64, now: u64) -> Result<LifecyclePhase> {
        let record = self.get_agenda(id).await?;
        let quorum = self.quorum().await?;
        Ok(derive_phase(&record, quorum, now))
    }

    /// Lifecycle phase of `id` at the current wall clock time
    pub async fn current_phase(&self, id: u64) -> Result<LifecyclePhase> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        self.phase_of(id, now).await
    }

    /// Input bytes of the transaction that created `id`, when its metadata
    /// names one
    pub async fn agenda_transaction_input(&self, id: u64) -> Result<Option<Vec<u8>>> {
        let record = self.get_agenda(id).await?;
        let Some(hash) = record
            .descriptive
            .as_ref()
            .and_then(|d| d.source_transaction_hash.clone())
        else {
            return Ok(None);
        };
        let input = self.fetcher.ledger().read_transaction_input(&hash).await?;
        Ok(Some(input))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    pub async fn load_next_page(&self) -> Result<PageLoad> {
        self.pagination.load_next_page().await
    }

    /// Re-read the count and reload page 1. The materialized list is only
    /// replaced if the reload succeeds.
    pub async fn refresh_agendas(&self) -> Result<PageLoad> {
        self.pagination.invalidate_total_count();
        self.pagination.load_page(1).await
    }

    /// Load every remaining page. Returns the number of pages loaded.
    pub async fn backfill_all(&self, cancel: &CancellationToken) -> Result<u32> {
        let mut pages = 0;
        loop {
            if cancel.is_cancelled() || self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self.pagination.load_next_page().await? {
                PageLoad::Loaded { page, records } => {
                    pages += 1;
                    debug!(page, records, "Backfilled page");
                }
                PageLoad::NoMorePages => break,
                PageLoad::AlreadyLoading => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(self.config.backfill_retry_delay) => {}
                    }
                }
            }
        }

        info!(pages, total = self.pagination.len(), "Backfill complete");
        Ok(pages)
    }
}
