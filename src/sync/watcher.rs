//! Event Watcher - applies ledger notifications to the materialized list
//!
//! The watcher owns one subscription on an [`EventSource`] and spawns a task
//! per notification. Handler failures are logged and never end the
//! subscription; only [`WatchHandle::cancel`] (or the source closing) does.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::BatchFetcher;
use super::pagination::PaginationStore;
use super::quorum::QuorumTracker;
use crate::chain::{EventKind, EventSource, LedgerEvent, LedgerEventKind};
use crate::metadata::MetadataCache;
use crate::types::Result;

/// Reaction to one ledger notification
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: LedgerEvent) -> Result<()>;
}

// =============================================================================
// Agenda Handler
// =============================================================================

/// Keeps the pagination store and quorum cache in step with the ledger
pub struct AgendaEventHandler {
    pagination: Arc<PaginationStore>,
    fetcher: Arc<BatchFetcher>,
    metadata: Arc<MetadataCache>,
    quorum: Arc<QuorumTracker>,
}

impl AgendaEventHandler {
    pub fn new(
        pagination: Arc<PaginationStore>,
        fetcher: Arc<BatchFetcher>,
        metadata: Arc<MetadataCache>,
        quorum: Arc<QuorumTracker>,
    ) -> Self {
        Self {
            pagination,
            fetcher,
            metadata,
            quorum,
        }
    }

    /// Re-read `id` and upsert it, keeping descriptive fields already held
    async fn refresh_record(&self, id: u64) -> Result<()> {
        let existing = self.pagination.get(id).and_then(|r| r.descriptive);
        let record = self.fetcher.load_one(id, existing).await?;
        if record.has_metadata() {
            self.metadata.mark_present(id);
        }
        self.pagination.upsert(record);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for AgendaEventHandler {
    async fn handle(&self, event: LedgerEvent) -> Result<()> {
        match event.kind {
            LedgerEventKind::AgendaCreated { id } => {
                // The count must cover the new id before the record lands
                self.pagination.invalidate_total_count();
                self.pagination.ensure_total_count().await?;
                self.refresh_record(id).await
            }
            LedgerEventKind::VoteCast { id, .. } | LedgerEventKind::AgendaExecuted { id } => {
                self.refresh_record(id).await
            }
            LedgerEventKind::MemberChanged { slot } => {
                debug!(slot, "Committee member changed, scheduling quorum refresh");
                self.quorum.schedule_refresh();
                Ok(())
            }
        }
    }
}

// =============================================================================
// Watcher
// =============================================================================

pub struct EventWatcher {
    source: Arc<dyn EventSource>,
    kinds: Vec<EventKind>,
}

impl EventWatcher {
    /// Watch every agenda and committee event
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            kinds: EventKind::ALL.to_vec(),
        }
    }

    /// Subscribe and start dispatching to `handler`
    pub async fn start(&self, handler: Arc<dyn EventHandler>) -> Result<WatchHandle> {
        let cancel = CancellationToken::new();
        let mut rx = self.source.subscribe(&self.kinds, cancel.clone()).await?;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut handlers = JoinSet::new();
            info!("Event watcher started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                    item = rx.recv() => match item {
                        Some(Ok(event)) => {
                            debug!(
                                event = ?event.kind,
                                block = event.block_number,
                                "Ledger event received"
                            );
                            let handler = Arc::clone(&handler);
                            handlers.spawn(async move {
                                let kind = event.kind.clone();
                                if let Err(e) = handler.handle(event).await {
                                    warn!(event = ?kind, error = %e, "Event handler failed");
                                }
                            });
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Event subscription error");
                        }
                        None => {
                            info!("Event source closed");
                            break;
                        }
                    }
                }
            }

            handlers.abort_all();
            info!("Event watcher stopped");
        });

        Ok(WatchHandle {
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Detaches a running watcher. Cancelling is idempotent and also happens
/// on drop.
pub struct WatchHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the dispatch loop to exit
    pub async fn shutdown(&self) {
        self.cancel();
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Event watcher task panicked");
                }
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
