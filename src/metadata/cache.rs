//! Metadata Cache - existence index of agendas that have metadata
//!
//! Used purely as a prefetch filter: the batch fetcher only asks the
//! metadata store for ids this index contains.
//!
//! The index is an immutable [`ExistenceSnapshot`] behind an `Arc`. A
//! refresh builds a new snapshot and swaps the pointer, so readers see
//! either the old set or the new one, never a partial rebuild.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::MetadataError;

// =============================================================================
// Index Trait and Snapshot
// =============================================================================

/// O(1) membership check for "has metadata"
pub trait ExistenceIndex: Send + Sync {
    fn has(&self, id: u64) -> bool;
}

impl ExistenceIndex for HashSet<u64> {
    fn has(&self, id: u64) -> bool {
        self.contains(&id)
    }
}

/// One generation of the existence index
#[derive(Debug, Clone, Default)]
pub struct ExistenceSnapshot {
    pub ids: HashSet<u64>,
    /// When this generation was built; `None` before the first refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ExistenceIndex for ExistenceSnapshot {
    fn has(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }
}

// =============================================================================
// Existence Source
// =============================================================================

/// Answers "which ids in this range have metadata"
#[async_trait]
pub trait ExistenceSource: Send + Sync {
    async fn existing_ids(&self, start: u64, end: u64) -> Result<Vec<u64>, MetadataError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeResponse {
    success: bool,
    #[serde(default)]
    existing_ids: Vec<u64>,
}

/// `GET {api}/metadata-range?network=&start=&end=`
pub struct HttpExistenceSource {
    client: Client,
    api_url: String,
    network: String,
}

impl HttpExistenceSource {
    pub fn new(
        api_url: impl Into<String>,
        network: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            network: network.into(),
        })
    }
}

#[async_trait]
impl ExistenceSource for HttpExistenceSource {
    async fn existing_ids(&self, start: u64, end: u64) -> Result<Vec<u64>, MetadataError> {
        let url = format!("{}/metadata-range", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("network", self.network.clone()),
                ("start", start.to_string()),
                ("end", end.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetadataError::Server {
                status: response.status().as_u16(),
            });
        }

        let body: RangeResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::InvalidDocument(format!("range response: {}", e)))?;

        if !body.success {
            return Err(MetadataError::RangeRejected);
        }
        Ok(body.existing_ids)
    }
}

// =============================================================================
// Metadata Cache
// =============================================================================

/// Existence index with atomic refresh and a background refresh task
pub struct MetadataCache {
    source: Arc<dyn ExistenceSource>,
    state: RwLock<IndexState>,
    /// Serializes refreshes so two rebuilds never race on the swap
    refresh_lock: Mutex<()>,
}

/// Published snapshot plus ids marked while a refresh is in flight
#[derive(Default)]
struct IndexState {
    current: Arc<ExistenceSnapshot>,
    /// `Some` between the start of a refresh fetch and its swap
    marked_in_flight: Option<HashSet<u64>>,
}

impl MetadataCache {
    pub fn new(source: Arc<dyn ExistenceSource>) -> Self {
        Self {
            source,
            state: RwLock::new(IndexState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<ExistenceSnapshot> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard.current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().current),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut IndexState) -> T) -> T {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// When the index was last rebuilt
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().refreshed_at
    }

    pub fn is_initialized(&self) -> bool {
        self.last_refreshed_at().is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the index for `[start, end]` and swap it in. On failure the
    /// previous snapshot stays in place. Ids marked present while the
    /// fetch is in flight survive the swap.
    pub async fn refresh(&self, start: u64, end: u64) -> Result<HashSet<u64>, MetadataError> {
        let _guard = self.refresh_lock.lock().await;
        self.with_state(|state| state.marked_in_flight = Some(HashSet::new()));

        let fetched = match self.source.existing_ids(start, end).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.with_state(|state| state.marked_in_flight = None);
                return Err(e);
            }
        };

        let ids = self.with_state(|state| {
            let mut ids: HashSet<u64> = fetched.into_iter().collect();
            ids.extend(state.marked_in_flight.take().unwrap_or_default());
            state.current = Arc::new(ExistenceSnapshot {
                ids: ids.clone(),
                refreshed_at: Some(Utc::now()),
            });
            ids
        });

        info!(start, end, count = ids.len(), "Metadata existence index refreshed");
        Ok(ids)
    }

    /// Add a single id learned outside a refresh (e.g. a metadata document
    /// that resolved for a freshly created agenda)
    pub fn mark_present(&self, id: u64) {
        let inserted = self.with_state(|state| {
            if let Some(marked) = state.marked_in_flight.as_mut() {
                marked.insert(id);
            }
            if state.current.ids.contains(&id) {
                return false;
            }
            let mut next = (*state.current).clone();
            next.ids.insert(id);
            state.current = Arc::new(next);
            true
        });
        if inserted {
            debug!(id, "Marked agenda as having metadata");
        }
    }

    /// Spawn the periodic refresh task.
    ///
    /// Waits until `total_count` is known and non-zero, then refreshes
    /// `[0, total - 1]` every `interval` and whenever the total changes.
    /// Stops when `cancel` fires.
    pub fn spawn_refresh_task(
        self: Arc<Self>,
        mut total_count: watch::Receiver<u64>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sender_alive = true;
            info!(interval_secs = interval.as_secs(), "Metadata refresh task started");

            loop {
                let total = *total_count.borrow_and_update();

                if total > 0 {
                    if let Err(e) = self.refresh(0, total - 1).await {
                        warn!(error = %e, "Metadata existence refresh failed, keeping previous index");
                    }
                } else if sender_alive {
                    // Nothing to index until the count is known
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = total_count.changed() => {
                            if changed.is_err() {
                                sender_alive = false;
                            }
                            continue;
                        }
                    }
                }

                if sender_alive {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                        changed = total_count.changed() => {
                            if changed.is_err() {
                                sender_alive = false;
                            }
                        }
                    }
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }

            info!("Metadata refresh task stopped");
        })
    }
}

impl ExistenceIndex for MetadataCache {
    fn has(&self, id: u64) -> bool {
        self.snapshot().ids.contains(&id)
    }
}
