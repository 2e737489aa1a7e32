//! End-to-end behaviour of `SyncContext` against in-memory ledger,
//! metadata and event sources.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use agenda_sync::agenda::{Creator, DescriptiveFields, LedgerFields};
use agenda_sync::chain::{
    EventKind, EventNotification, EventSource, LedgerEvent, LedgerEventKind, LedgerReader,
    RpcError,
};
use agenda_sync::metadata::{ExistenceSource, MetadataError, MetadataSource};
use agenda_sync::sync::{BatchConfig, PaginationConfig};
use agenda_sync::{PageLoad, SyncConfig, SyncContext};

// =============================================================================
// Mocks
// =============================================================================

#[derive(Default)]
struct MockLedger {
    count: AtomicU64,
    yes_votes: Mutex<HashMap<u64, u64>>,
}

impl MockLedger {
    fn with_count(count: u64) -> Arc<Self> {
        let ledger = Self::default();
        ledger.count.store(count, Ordering::SeqCst);
        Arc::new(ledger)
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn read_record(&self, id: u64) -> Result<LedgerFields, RpcError> {
        if id >= self.count.load(Ordering::SeqCst) {
            return Err(RpcError::Decode(format!("agenda {} does not exist", id)));
        }
        let yes_votes = self.yes_votes.lock().unwrap().get(&id).copied().unwrap_or(0);
        Ok(LedgerFields {
            created_at: 1_000 + id,
            notice_end_at: 2_000 + id,
            voting_period_secs: 600,
            yes_votes,
            ..Default::default()
        })
    }

    async fn read_record_at(&self, id: u64, _block: u64) -> Result<LedgerFields, RpcError> {
        self.read_record(id).await
    }

    async fn read_count(&self) -> Result<u64, RpcError> {
        Ok(self.count.load(Ordering::SeqCst))
    }

    async fn read_quorum(&self) -> Result<u64, RpcError> {
        Ok(2)
    }

    async fn read_transaction_input(&self, _hash: &str) -> Result<Vec<u8>, RpcError> {
        Ok(vec![])
    }
}

/// Metadata host that only has documents for `present`
struct MockMetadata {
    present: HashSet<u64>,
    requested: Mutex<Vec<u64>>,
}

impl MockMetadata {
    fn with(ids: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            present: ids.iter().copied().collect(),
            requested: Mutex::new(Vec::new()),
        })
    }

    fn requested(&self) -> Vec<u64> {
        let mut ids = self.requested.lock().unwrap().clone();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MetadataSource for MockMetadata {
    async fn fetch(&self, id: u64) -> Result<Option<DescriptiveFields>, MetadataError> {
        self.requested.lock().unwrap().push(id);
        if !self.present.contains(&id) {
            return Ok(None);
        }
        Ok(Some(DescriptiveFields {
            title: format!("Proposal {}", id),
            description: "Adjust committee parameters".to_string(),
            creator: Creator::Address {
                address: "0x00000000000000000000000000000000000000aa".to_string(),
            },
            network: "sepolia".to_string(),
            external_links: Default::default(),
            source_transaction_hash: None,
            actions: vec![],
        }))
    }
}

#[async_trait]
impl ExistenceSource for MockMetadata {
    async fn existing_ids(&self, start: u64, end: u64) -> Result<Vec<u64>, MetadataError> {
        Ok(self
            .present
            .iter()
            .copied()
            .filter(|id| (start..=end).contains(id))
            .collect())
    }
}

/// Event source the test pushes into
#[derive(Default)]
struct PushEvents {
    tx: Mutex<Option<mpsc::Sender<EventNotification>>>,
}

impl PushEvents {
    async fn push(&self, kind: LedgerEventKind) {
        let tx = self.tx.lock().unwrap().clone().unwrap();
        tx.send(Ok(LedgerEvent {
            kind,
            block_number: 1,
            log_index: 0,
            transaction_hash: None,
        }))
        .await
        .unwrap();
    }
}

#[async_trait]
impl EventSource for PushEvents {
    async fn subscribe(
        &self,
        _kinds: &[EventKind],
        _cancel: CancellationToken,
    ) -> agenda_sync::Result<mpsc::Receiver<EventNotification>> {
        let (tx, rx) = mpsc::channel(32);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

struct Harness {
    ledger: Arc<MockLedger>,
    metadata: Arc<MockMetadata>,
    events: Arc<PushEvents>,
    ctx: SyncContext,
}

fn harness(count: u64, with_metadata: &[u64]) -> Harness {
    let ledger = MockLedger::with_count(count);
    let metadata = MockMetadata::with(with_metadata);
    let events = Arc::new(PushEvents::default());
    let ctx = SyncContext::new(
        ledger.clone(),
        metadata.clone(),
        metadata.clone(),
        events.clone(),
        SyncConfig {
            pagination: PaginationConfig { page_size: 10 },
            batch: BatchConfig {
                batch_size: 4,
                batch_delay: Duration::from_millis(1),
            },
            quorum_debounce: Duration::from_millis(10),
            ..Default::default()
        },
    );
    Harness {
        ledger,
        metadata,
        events,
        ctx,
    }
}

fn ids(ctx: &SyncContext) -> Vec<u64> {
    ctx.snapshot().agendas.iter().map(|r| r.id).collect()
}

fn assert_strictly_descending(ids: &[u64]) {
    assert!(ids.windows(2).all(|w| w[0] > w[1]), "not strictly descending: {:?}", ids);
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_first_page_then_next() {
    let h = harness(25, &[]);

    let outcome = assert_ok!(h.ctx.load_next_page().await);
    assert_eq!(outcome, PageLoad::Loaded { page: 1, records: 10 });
    assert_eq!(ids(&h.ctx), (15..=24).rev().collect::<Vec<_>>());
    assert_eq!(h.ctx.remaining_count(), 15);

    assert_ok!(h.ctx.load_next_page().await);
    assert_eq!(ids(&h.ctx), (5..=24).rev().collect::<Vec<_>>());
    assert_eq!(h.ctx.remaining_count(), 5);
    assert!(h.ctx.has_more());
}

#[tokio::test]
async fn test_only_indexed_ids_hit_the_metadata_store() {
    let h = harness(8, &[1, 3, 5]);

    let pages = assert_ok!(h.ctx.backfill_all(&CancellationToken::new()).await);
    assert_eq!(pages, 1);
    assert_eq!(h.metadata.requested(), vec![1, 3, 5]);

    let snapshot = h.ctx.snapshot();
    let titled: Vec<u64> = snapshot
        .agendas
        .iter()
        .filter(|r| r.has_metadata())
        .map(|r| r.id)
        .collect();
    assert_eq!(titled, vec![5, 3, 1]);
    assert_eq!(snapshot.agendas[0].title(), "Agenda #7");
}

#[tokio::test]
async fn test_created_event_before_backfill() {
    let h = harness(12, &[]);
    assert_ok!(h.ctx.load_next_page().await);
    assert_ok!(h.ctx.start().await);

    h.ledger.count.store(13, Ordering::SeqCst);
    h.events.push(LedgerEventKind::AgendaCreated { id: 12 }).await;

    assert!(eventually(|| h.ctx.snapshot().agendas.first().map(|r| r.id) == Some(12)).await);
    let snapshot = h.ctx.snapshot();
    assert_eq!(snapshot.total_count, 13);
    assert_strictly_descending(&ids(&h.ctx));
    assert!(snapshot.agendas.len() as u64 <= snapshot.total_count);
    assert_eq!(
        h.ctx.remaining_count(),
        snapshot.total_count - snapshot.agendas.len() as u64
    );

    assert_eq!(assert_ok!(h.ctx.backfill_all(&CancellationToken::new()).await), 1);
    assert_eq!(ids(&h.ctx), (0..=12).rev().collect::<Vec<_>>());

    h.ctx.shutdown().await;
}

#[tokio::test]
async fn test_created_event_on_fresh_context() {
    let h = harness(12, &[]);
    assert_ok!(h.ctx.start().await);
    assert_eq!(h.ctx.snapshot().current_page, 0);

    h.ledger.count.store(13, Ordering::SeqCst);
    h.events.push(LedgerEventKind::AgendaCreated { id: 12 }).await;

    assert!(eventually(|| h.ctx.snapshot().agendas.iter().any(|r| r.id == 12)).await);
    let snapshot = h.ctx.snapshot();
    assert_eq!(snapshot.total_count, 13);
    assert_eq!(snapshot.agendas.len(), 1);
    assert_eq!(h.ctx.remaining_count(), 12);

    let outcome = assert_ok!(h.ctx.load_next_page().await);
    assert_eq!(outcome, PageLoad::Loaded { page: 1, records: 10 });
    let loaded = ids(&h.ctx);
    assert_eq!(loaded, (3..=12).rev().collect::<Vec<_>>());
    let unique: HashSet<u64> = loaded.iter().copied().collect();
    assert_eq!(unique.len(), loaded.len());
    assert_strictly_descending(&loaded);
    assert_eq!(h.ctx.remaining_count(), 3);

    h.ctx.shutdown().await;
}

#[tokio::test]
async fn test_vote_event_updates_in_place() {
    let h = harness(5, &[2]);
    assert_ok!(h.ctx.load_next_page().await);
    assert_ok!(h.ctx.start().await);
    let before = ids(&h.ctx);

    h.ledger.yes_votes.lock().unwrap().insert(2, 3);
    h.events
        .push(LedgerEventKind::VoteCast {
            id: 2,
            voter: "0x00000000000000000000000000000000000000bb".to_string(),
        })
        .await;

    assert!(eventually(|| h.ctx.snapshot().agendas.iter().any(|r| r.id == 2 && r.ledger.yes_votes == 3)).await);
    assert_eq!(ids(&h.ctx), before);

    let record = assert_ok!(h.ctx.get_agenda(2).await);
    assert_eq!(record.title(), "Proposal 2");

    h.ctx.shutdown().await;
}

#[tokio::test]
async fn test_repeated_events_are_idempotent() {
    let h = harness(3, &[]);
    assert_ok!(h.ctx.load_next_page().await);
    assert_ok!(h.ctx.start().await);

    for _ in 0..3 {
        h.events.push(LedgerEventKind::AgendaExecuted { id: 1 }).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(ids(&h.ctx), vec![2, 1, 0]);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn test_missing_metadata_never_fails_a_page() {
    // Index claims documents that the host does not actually have
    let h = harness(6, &[]);
    let indexed = MockMetadata::with(&[0, 1, 2, 3, 4, 5]);
    let ctx = SyncContext::new(
        h.ledger.clone(),
        h.metadata.clone(),
        indexed,
        h.events.clone(),
        SyncConfig::default(),
    );

    assert_ok!(ctx.load_next_page().await);
    let snapshot = ctx.snapshot();
    assert_eq!(snapshot.agendas.len(), 6);
    assert!(snapshot.error.is_none());
    assert!(snapshot.agendas.iter().all(|r| r.title() == format!("Agenda #{}", r.id)));
}

#[tokio::test]
async fn test_refresh_picks_up_new_agendas() {
    let h = harness(4, &[]);
    assert_ok!(h.ctx.load_next_page().await);

    h.ledger.count.store(6, Ordering::SeqCst);
    assert_ok!(h.ctx.refresh_agendas().await);

    assert_eq!(h.ctx.snapshot().total_count, 6);
    assert_eq!(ids(&h.ctx), vec![5, 4, 3, 2, 1, 0]);
}
