//! Pagination Store - the materialized, id-descending agenda list
//!
//! Page `n` covers ids counting down from the newest agenda:
//!
//! ```text
//! total = 25, page_size = 10
//! page 1: 24..=15   page 2: 14..=5   page 3: 4..=0
//! ```
//!
//! Only one page load is in flight at a time; a concurrent request is
//! rejected with [`PageLoad::AlreadyLoading`]. Upserts from the event
//! watcher may interleave with a load at any point, and insert in sorted
//! position so the list stays strictly descending without duplicates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::BatchFetcher;
use crate::agenda::AgendaRecord;
use crate::metadata::MetadataCache;
use crate::types::{Result, SyncError};

/// Pagination configuration
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

/// Outcome of a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    Loaded { page: u32, records: usize },
    /// Another load was in flight; this request was dropped
    AlreadyLoading,
    NoMorePages,
}

/// Read-only view of the store
#[derive(Debug, Clone, Serialize)]
pub struct AgendaSnapshot {
    pub total_count: u64,
    pub current_page: u32,
    pub agendas: Vec<AgendaRecord>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct PageState {
    total_count: u64,
    count_known: bool,
    current_page: u32,
    agendas: Vec<AgendaRecord>,
    last_error: Option<String>,
}

impl PageState {
    /// Replace or insert at the sorted position. Returns true on insert.
    fn upsert(&mut self, record: AgendaRecord) -> bool {
        match self.agendas.binary_search_by(|r| record.id.cmp(&r.id)) {
            Ok(i) => {
                self.agendas[i] = record;
                false
            }
            Err(i) => {
                self.agendas.insert(i, record);
                true
            }
        }
    }

    /// Keep `len <= total_count` when ids beyond the count show up
    fn cover(&mut self, id: u64) -> bool {
        if id >= self.total_count {
            self.total_count = id + 1;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u64 {
        self.total_count.saturating_sub(self.agendas.len() as u64)
    }
}

/// Resets the in-flight flag when a load ends, however it ends
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Inclusive `(low, high)` id range for page `page`, or `None` past the end
pub fn page_range(total_count: u64, page_size: u32, page: u32) -> Option<(u64, u64)> {
    if page == 0 || page_size == 0 {
        return None;
    }
    let size = u64::from(page_size);
    let skipped = u64::from(page - 1).checked_mul(size)?;
    if skipped >= total_count {
        return None;
    }
    let high = total_count - 1 - skipped;
    let low = high.saturating_sub(size - 1);
    Some((low, high))
}

pub struct PaginationStore {
    fetcher: Arc<BatchFetcher>,
    metadata: Arc<MetadataCache>,
    config: PaginationConfig,
    state: RwLock<PageState>,
    loading: AtomicBool,
    count_lock: Mutex<()>,
    total_tx: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl PaginationStore {
    pub fn new(
        fetcher: Arc<BatchFetcher>,
        metadata: Arc<MetadataCache>,
        config: PaginationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (total_tx, _) = watch::channel(0);
        Self {
            fetcher,
            metadata,
            config,
            state: RwLock::new(PageState::default()),
            loading: AtomicBool::new(false),
            count_lock: Mutex::new(()),
            total_tx,
            cancel,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PageState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PageState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    fn publish_total(&self, total: u64) {
        self.total_tx.send_if_modified(|current| {
            if *current == total {
                false
            } else {
                *current = total;
                true
            }
        });
    }

    /// Follow `total_count` as it changes
    pub fn subscribe_total(&self) -> watch::Receiver<u64> {
        self.total_tx.subscribe()
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    // =========================================================================
    // Total Count
    // =========================================================================

    /// Read the agenda count from the ledger unless it is already known
    pub async fn ensure_total_count(&self) -> Result<u64> {
        {
            let state = self.read_state();
            if state.count_known {
                return Ok(state.total_count);
            }
        }

        let _guard = self.count_lock.lock().await;
        {
            let state = self.read_state();
            if state.count_known {
                return Ok(state.total_count);
            }
        }

        let count = self.fetcher.ledger().read_count().await?;

        let total = {
            let mut state = self.write_state();
            let newest = state.agendas.first().map(|r| r.id + 1).unwrap_or(0);
            state.total_count = count.max(newest);
            state.count_known = true;
            state.total_count
        };
        self.publish_total(total);
        info!(total_count = total, "Agenda count loaded");
        Ok(total)
    }

    /// Force the next `ensure_total_count` to read the ledger again
    pub fn invalidate_total_count(&self) {
        self.write_state().count_known = false;
        debug!("Agenda count invalidated");
    }

    // =========================================================================
    // Page Loads
    // =========================================================================

    /// Load page `page` (1-based). Page 1 replaces the materialized list;
    /// later pages are merged into it.
    pub async fn load_page(&self, page: u32) -> Result<PageLoad> {
        if page == 0 {
            return Err(SyncError::InvalidPage(page));
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(page, "Page load already in flight");
            return Ok(PageLoad::AlreadyLoading);
        }
        let _loading = LoadingGuard(&self.loading);

        match self.load_page_inner(page).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(page, error = %e, "Page load failed");
                self.write_state().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn load_page_inner(&self, page: u32) -> Result<PageLoad> {
        let total = self.ensure_total_count().await?;

        if total > 0 && !self.metadata.is_initialized() {
            if let Err(e) = self.metadata.refresh(0, total - 1).await {
                warn!(error = %e, "Metadata index unavailable, loading without metadata");
            }
        }

        let Some((low, high)) = page_range(total, self.config.page_size, page) else {
            self.write_state().last_error = None;
            return Ok(PageLoad::NoMorePages);
        };

        let records = self
            .fetcher
            .load_range(low, high, self.metadata.as_ref(), &self.cancel)
            .await?;
        let loaded = records.len();

        let total = {
            let mut state = self.write_state();
            if page == 1 {
                // Keep anything newer than this page that an event
                // inserted while the load was running
                let newer: Vec<AgendaRecord> = state
                    .agendas
                    .drain(..)
                    .filter(|r| r.id > high)
                    .collect();
                state.agendas = records;
                for record in newer {
                    state.upsert(record);
                }
            } else {
                for record in records {
                    state.upsert(record);
                }
            }
            if let Some(newest) = state.agendas.first().map(|r| r.id) {
                state.cover(newest);
            }
            state.current_page = page;
            state.last_error = None;
            state.total_count
        };
        self.publish_total(total);

        info!(page, from = high, to = low, loaded, "Page loaded");
        Ok(PageLoad::Loaded {
            page,
            records: loaded,
        })
    }

    /// Load the page after the current one
    pub async fn load_next_page(&self) -> Result<PageLoad> {
        let next = {
            let state = self.read_state();
            if state.count_known && state.remaining() == 0 {
                return Ok(PageLoad::NoMorePages);
            }
            state.current_page + 1
        };
        self.load_page(next).await
    }

    // =========================================================================
    // Mutation and Queries
    // =========================================================================

    /// Insert or replace a single record. Returns true if it was new.
    pub fn upsert(&self, record: AgendaRecord) -> bool {
        let id = record.id;
        let (inserted, total) = {
            let mut state = self.write_state();
            let inserted = state.upsert(record);
            state.cover(id);
            (inserted, state.total_count)
        };
        self.publish_total(total);
        debug!(id, inserted, "Agenda upserted");
        inserted
    }

    pub fn get(&self, id: u64) -> Option<AgendaRecord> {
        let state = self.read_state();
        state
            .agendas
            .binary_search_by(|r| id.cmp(&r.id))
            .ok()
            .map(|i| state.agendas[i].clone())
    }

    pub fn has_more(&self) -> bool {
        self.remaining_count() > 0
    }

    pub fn remaining_count(&self) -> u64 {
        self.read_state().remaining()
    }

    pub fn total_count(&self) -> u64 {
        self.read_state().total_count
    }

    pub fn len(&self) -> usize {
        self.read_state().agendas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> AgendaSnapshot {
        let state = self.read_state();
        AgendaSnapshot {
            total_count: state.total_count,
            current_page: state.current_page,
            agendas: state.agendas.clone(),
            is_loading: self.is_loading(),
            error: state.last_error.clone(),
        }
    }

    /// Drop everything materialized and forget the count
    pub fn reset(&self) {
        *self.write_state() = PageState::default();
        self.publish_total(0);
        info!("Pagination state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::{DescriptiveFields, LedgerFields};
    use crate::chain::{LedgerReader, RpcError};
    use crate::metadata::{ExistenceSource, MetadataError, MetadataSource};
    use crate::sync::batch::BatchConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::time::Duration;

    struct CountingLedger {
        count: AtomicU64,
        fail: AtomicBool,
        /// Ids at or above this fail with every endpoint exhausted
        exhausted_from: AtomicU64,
        delay: Duration,
    }

    #[async_trait]
    impl LedgerReader for CountingLedger {
        async fn read_record(&self, id: u64) -> std::result::Result<LedgerFields, RpcError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if id >= self.exhausted_from.load(Ordering::SeqCst) {
                return Err(RpcError::Exhausted {
                    endpoints: 2,
                    last: Box::new(RpcError::Timeout("node-b".into())),
                });
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RpcError::Connection("refused".into()));
            }
            Ok(LedgerFields {
                created_at: id,
                ..Default::default()
            })
        }

        async fn read_record_at(&self, id: u64, _block: u64) -> std::result::Result<LedgerFields, RpcError> {
            self.read_record(id).await
        }

        async fn read_count(&self) -> std::result::Result<u64, RpcError> {
            Ok(self.count.load(Ordering::SeqCst))
        }

        async fn read_quorum(&self) -> std::result::Result<u64, RpcError> {
            Ok(1)
        }

        async fn read_transaction_input(&self, _hash: &str) -> std::result::Result<Vec<u8>, RpcError> {
            Ok(vec![])
        }
    }

    struct NoMetadata;

    #[async_trait]
    impl MetadataSource for NoMetadata {
        async fn fetch(&self, _id: u64) -> std::result::Result<Option<DescriptiveFields>, MetadataError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl ExistenceSource for NoMetadata {
        async fn existing_ids(&self, _start: u64, _end: u64) -> std::result::Result<Vec<u64>, MetadataError> {
            Ok(vec![])
        }
    }

    fn ledger(count: u64) -> Arc<CountingLedger> {
        Arc::new(CountingLedger {
            count: AtomicU64::new(count),
            fail: AtomicBool::new(false),
            exhausted_from: AtomicU64::new(u64::MAX),
            delay: Duration::ZERO,
        })
    }

    fn store_with(ledger: Arc<CountingLedger>) -> PaginationStore {
        let fetcher = BatchFetcher::new(
            ledger,
            Arc::new(NoMetadata),
            BatchConfig {
                batch_size: 4,
                batch_delay: Duration::ZERO,
            },
        );
        PaginationStore::new(
            Arc::new(fetcher),
            Arc::new(MetadataCache::new(Arc::new(NoMetadata))),
            PaginationConfig { page_size: 10 },
            CancellationToken::new(),
        )
    }

    fn record(id: u64) -> AgendaRecord {
        AgendaRecord::merge(id, LedgerFields::default(), None)
    }

    fn ids(store: &PaginationStore) -> Vec<u64> {
        store.snapshot().agendas.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_page_range() {
        assert_eq!(page_range(25, 10, 1), Some((15, 24)));
        assert_eq!(page_range(25, 10, 2), Some((5, 14)));
        assert_eq!(page_range(25, 10, 3), Some((0, 4)));
        assert_eq!(page_range(25, 10, 4), None);
        assert_eq!(page_range(0, 10, 1), None);
        assert_eq!(page_range(10, 10, 0), None);
    }

    #[tokio::test]
    async fn test_first_two_pages() {
        let store = store_with(ledger(25));

        let outcome = store.load_page(1).await.unwrap();
        assert_eq!(outcome, PageLoad::Loaded { page: 1, records: 10 });
        assert_eq!(ids(&store), (15..=24).rev().collect::<Vec<_>>());
        assert_eq!(store.remaining_count(), 15);

        store.load_next_page().await.unwrap();
        assert_eq!(ids(&store), (5..=24).rev().collect::<Vec<_>>());
        assert_eq!(store.snapshot().current_page, 2);
        assert!(store.has_more());

        store.load_next_page().await.unwrap();
        assert_eq!(store.len(), 25);
        assert!(!store.has_more());
        assert_eq!(store.load_next_page().await.unwrap(), PageLoad::NoMorePages);
    }

    #[tokio::test]
    async fn test_count_read_once_until_invalidated() {
        let ledger = ledger(5);
        let store = store_with(ledger.clone());
        assert_eq!(store.ensure_total_count().await.unwrap(), 5);

        ledger.count.store(7, Ordering::SeqCst);
        assert_eq!(store.ensure_total_count().await.unwrap(), 5);

        store.invalidate_total_count();
        assert_eq!(store.ensure_total_count().await.unwrap(), 7);
        assert_eq!(*store.subscribe_total().borrow(), 7);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_sorted() {
        let store = store_with(ledger(10));
        store.ensure_total_count().await.unwrap();

        assert!(store.upsert(record(3)));
        assert!(store.upsert(record(7)));
        assert!(store.upsert(record(5)));
        assert!(!store.upsert(record(5)));
        assert_eq!(ids(&store), vec![7, 5, 3]);

        let mut updated = record(5);
        updated.ledger.yes_votes = 2;
        store.upsert(updated);
        assert_eq!(ids(&store), vec![7, 5, 3]);
        assert_eq!(store.get(5).unwrap().ledger.yes_votes, 2);
        assert!(store.get(4).is_none());
    }

    #[tokio::test]
    async fn test_upsert_beyond_count_raises_total() {
        let store = store_with(ledger(3));
        store.ensure_total_count().await.unwrap();

        store.upsert(record(5));
        assert_eq!(store.total_count(), 6);
        assert!(store.len() as u64 <= store.total_count());
        assert_eq!(store.remaining_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_data() {
        let ledger = ledger(20);
        let store = store_with(ledger.clone());
        store.load_page(1).await.unwrap();

        ledger.fail.store(true, Ordering::SeqCst);
        assert!(store.load_next_page().await.is_err());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.agendas.len(), 10);
        assert_eq!(snapshot.current_page, 1);
        assert!(!snapshot.is_loading);
        assert!(snapshot.error.is_some());

        ledger.fail.store(false, Ordering::SeqCst);
        store.load_next_page().await.unwrap();
        assert!(store.snapshot().error.is_none());
        assert_eq!(store.len(), 20);
    }

    #[tokio::test]
    async fn test_exhausted_reads_fail_the_page_until_retried() {
        let ledger = ledger(25);
        ledger.exhausted_from.store(20, Ordering::SeqCst);
        let store = store_with(ledger.clone());

        assert!(matches!(
            store.load_next_page().await,
            Err(SyncError::Rpc(RpcError::Exhausted { .. }))
        ));
        let snapshot = store.snapshot();
        assert!(snapshot.agendas.is_empty());
        assert_eq!(snapshot.current_page, 0);
        assert!(snapshot.error.is_some());
        assert!(store.has_more());

        ledger.exhausted_from.store(u64::MAX, Ordering::SeqCst);
        assert_eq!(
            store.load_next_page().await.unwrap(),
            PageLoad::Loaded { page: 1, records: 10 }
        );
        assert_eq!(ids(&store), (15..=24).rev().collect::<Vec<_>>());
        assert!(store.snapshot().error.is_none());

        store.load_next_page().await.unwrap();
        store.load_next_page().await.unwrap();
        assert_eq!(store.len(), 25);
        assert!(!store.has_more());
        assert_eq!(store.load_next_page().await.unwrap(), PageLoad::NoMorePages);
    }

    #[tokio::test]
    async fn test_concurrent_load_rejected() {
        let ledger = Arc::new(CountingLedger {
            count: AtomicU64::new(10),
            fail: AtomicBool::new(false),
            exhausted_from: AtomicU64::new(u64::MAX),
            delay: Duration::from_millis(50),
        });
        let store = Arc::new(store_with(ledger));

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load_page(1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.is_loading());
        assert_eq!(store.load_page(1).await.unwrap(), PageLoad::AlreadyLoading);

        assert!(matches!(
            first.await.unwrap().unwrap(),
            PageLoad::Loaded { page: 1, .. }
        ));
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_reload_first_page_covers_upserted_ids() {
        let store = store_with(ledger(12));
        store.load_page(1).await.unwrap();
        store.upsert(record(12));

        store.invalidate_total_count();
        store.load_page(1).await.unwrap();
        assert_eq!(store.total_count(), 13);
        assert_eq!(ids(&store), (3..=12).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_invalid_page_and_reset() {
        let store = store_with(ledger(3));
        assert!(matches!(store.load_page(0).await, Err(SyncError::InvalidPage(0))));

        store.load_page(1).await.unwrap();
        assert_eq!(store.len(), 3);
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.total_count(), 0);
        assert_eq!(store.snapshot().current_page, 0);
    }
}
