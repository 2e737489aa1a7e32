//! Batch Fetcher - loads id ranges from the ledger and merges metadata
//!
//! A range is walked from the highest id to the lowest in fixed-size
//! batches. Batches run one after another; the ledger reads inside a batch
//! run concurrently. Ids whose ledger data cannot be decoded are dropped and
//! logged; a transport failure on any id fails the whole range so the caller
//! can retry it. Only ids the existence index knows about are sent to the
//! metadata store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agenda::{AgendaRecord, DescriptiveFields, LedgerFields};
use crate::chain::LedgerReader;
use crate::metadata::{ExistenceIndex, MetadataSource};
use crate::types::{Result, SyncError};

/// Batch fetcher configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Ids per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
        }
    }
}

pub struct BatchFetcher {
    ledger: Arc<dyn LedgerReader>,
    metadata: Arc<dyn MetadataSource>,
    config: BatchConfig,
}

impl BatchFetcher {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        metadata: Arc<dyn MetadataSource>,
        config: BatchConfig,
    ) -> Self {
        Self {
            ledger,
            metadata,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerReader> {
        &self.ledger
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataSource> {
        &self.metadata
    }

    /// Load `[start, end]` inclusive, returned in descending id order.
    ///
    /// Fails when any read in the range failed with a transport error
    /// (endpoints exhausted), or when `cancel` fires. Undecodable ids are
    /// dropped without failing the range.
    pub async fn load_range(
        &self,
        start: u64,
        end: u64,
        index: &dyn ExistenceIndex,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgendaRecord>> {
        if start > end {
            return Ok(Vec::new());
        }

        let ids: Vec<u64> = (start..=end).rev().collect();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = ids.len().div_ceil(batch_size);

        let mut records = Vec::with_capacity(ids.len());

        for (n, batch) in ids.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let loaded = self.load_batch(batch, index).await?;
            debug!(
                batch = n + 1,
                of = batch_count,
                requested = batch.len(),
                loaded = loaded.len(),
                "Batch loaded"
            );
            records.extend(loaded);

            if n + 1 < batch_count && !self.config.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                }
            }
        }

        records.sort_by(|a, b| b.id.cmp(&a.id));
        info!(start, end, loaded = records.len(), "Range loaded");
        Ok(records)
    }

    async fn load_batch(
        &self,
        ids: &[u64],
        index: &dyn ExistenceIndex,
    ) -> Result<Vec<AgendaRecord>> {
        let reads = join_all(ids.iter().map(|&id| async move {
            (id, self.ledger.read_record(id).await)
        }))
        .await;

        let mut ledgers: Vec<(u64, LedgerFields)> = Vec::with_capacity(reads.len());
        let mut transport_error: Option<SyncError> = None;
        for (id, result) in reads {
            match result {
                Ok(fields) => ledgers.push((id, fields)),
                Err(e) => {
                    let err = SyncError::from(e);
                    if err.is_record_local() {
                        warn!(id, error = %err, "Dropping undecodable agenda");
                    } else {
                        warn!(id, error = %err, "Ledger read failed");
                        transport_error.get_or_insert(err);
                    }
                }
            }
        }
        if let Some(err) = transport_error {
            return Err(err);
        }

        let wanted: Vec<u64> = ledgers
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| index.has(*id))
            .collect();

        let mut metadata = if wanted.is_empty() {
            Default::default()
        } else {
            self.metadata.fetch_all(&wanted).await
        };

        Ok(ledgers
            .into_iter()
            .map(|(id, ledger)| AgendaRecord::merge(id, ledger, metadata.remove(&id)))
            .collect())
    }

    /// Fresh single-record read. Existing descriptive fields are reused;
    /// otherwise the metadata store is asked directly, and a metadata
    /// failure only costs the descriptive half.
    pub async fn load_one(
        &self,
        id: u64,
        existing: Option<DescriptiveFields>,
    ) -> Result<AgendaRecord> {
        let ledger = self.ledger.read_record(id).await?;

        let descriptive = match existing {
            Some(fields) => Some(fields),
            None => match self.metadata.fetch(id).await {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(id, error = %e, "Metadata fetch failed, using placeholder");
                    None
                }
            },
        };

        Ok(AgendaRecord::merge(id, ledger, descriptive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::Creator;
    use crate::chain::RpcError;
    use crate::metadata::MetadataError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MockLedger {
        count: u64,
        failing: HashSet<u64>,
        undecodable: HashSet<u64>,
    }

    #[async_trait]
    impl LedgerReader for MockLedger {
        async fn read_record(&self, id: u64) -> std::result::Result<LedgerFields, RpcError> {
            if self.failing.contains(&id) {
                return Err(RpcError::Timeout("node-a".into()));
            }
            if self.undecodable.contains(&id) {
                return Err(RpcError::Decode("short tuple".into()));
            }
            Ok(LedgerFields {
                created_at: 1_000 + id,
                ..Default::default()
            })
        }

        async fn read_record_at(&self, id: u64, _block: u64) -> std::result::Result<LedgerFields, RpcError> {
            self.read_record(id).await
        }

        async fn read_count(&self) -> std::result::Result<u64, RpcError> {
            Ok(self.count)
        }

        async fn read_quorum(&self) -> std::result::Result<u64, RpcError> {
            Ok(2)
        }

        async fn read_transaction_input(&self, _hash: &str) -> std::result::Result<Vec<u8>, RpcError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct RecordingMetadata {
        requested: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl MetadataSource for RecordingMetadata {
        async fn fetch(&self, id: u64) -> std::result::Result<Option<DescriptiveFields>, MetadataError> {
            self.requested.lock().unwrap().push(id);
            if self.fail {
                return Err(MetadataError::Server { status: 503 });
            }
            Ok(Some(descriptive(&format!("Agenda {}", id))))
        }
    }

    fn descriptive(title: &str) -> DescriptiveFields {
        DescriptiveFields {
            title: title.to_string(),
            description: String::new(),
            creator: Creator::Address {
                address: "0xabc".to_string(),
            },
            network: "sepolia".to_string(),
            external_links: Default::default(),
            source_transaction_hash: None,
            actions: vec![],
        }
    }

    fn fetcher(ledger: MockLedger, metadata: Arc<RecordingMetadata>) -> BatchFetcher {
        BatchFetcher::new(
            Arc::new(ledger),
            metadata,
            BatchConfig {
                batch_size: 3,
                batch_delay: Duration::ZERO,
            },
        )
    }

    fn ledger(failing: &[u64]) -> MockLedger {
        MockLedger {
            count: 10,
            failing: failing.iter().copied().collect(),
            undecodable: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn test_range_is_descending() {
        let metadata = Arc::new(RecordingMetadata::default());
        let records = fetcher(ledger(&[]), metadata)
            .load_range(0, 7, &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert!(records.iter().all(|r| !r.has_metadata()));
        assert_eq!(records[0].title(), "Agenda #7");
    }

    #[tokio::test]
    async fn test_metadata_only_for_indexed_ids() {
        let metadata = Arc::new(RecordingMetadata::default());
        let index: HashSet<u64> = [1, 3, 5].into_iter().collect();

        let records = fetcher(ledger(&[]), metadata.clone())
            .load_range(0, 6, &index, &CancellationToken::new())
            .await
            .unwrap();

        let mut requested = metadata.requested.lock().unwrap().clone();
        requested.sort();
        assert_eq!(requested, vec![1, 3, 5]);

        let with_meta: Vec<u64> = records.iter().filter(|r| r.has_metadata()).map(|r| r.id).collect();
        assert_eq!(with_meta, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn test_undecodable_ids_are_dropped() {
        let metadata = Arc::new(RecordingMetadata::default());
        let ledger = MockLedger {
            count: 6,
            failing: HashSet::new(),
            undecodable: [2, 4].into_iter().collect(),
        };
        let records = fetcher(ledger, metadata)
            .load_range(0, 5, &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 3, 1, 0]);
    }

    #[tokio::test]
    async fn test_partial_transport_failure_fails_range() {
        let metadata = Arc::new(RecordingMetadata::default());
        let err = fetcher(ledger(&[4]), metadata)
            .load_range(0, 5, &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Rpc(RpcError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_whole_range_failure_surfaces() {
        let metadata = Arc::new(RecordingMetadata::default());
        let err = fetcher(ledger(&[0, 1, 2]), metadata)
            .load_range(0, 2, &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Rpc(RpcError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_all_undecodable_is_empty_not_error() {
        let metadata = Arc::new(RecordingMetadata::default());
        let ledger = MockLedger {
            count: 2,
            failing: HashSet::new(),
            undecodable: [0, 1].into_iter().collect(),
        };
        let records = fetcher(ledger, metadata)
            .load_range(0, 1, &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_record() {
        let metadata = Arc::new(RecordingMetadata {
            fail: true,
            ..Default::default()
        });
        let index: HashSet<u64> = [1].into_iter().collect();
        let records = fetcher(ledger(&[]), metadata)
            .load_range(0, 2, &index, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| !r.has_metadata()));
    }

    #[tokio::test]
    async fn test_cancelled_range() {
        let metadata = Arc::new(RecordingMetadata::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher(ledger(&[]), metadata)
            .load_range(0, 5, &HashSet::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn test_load_one_reuses_existing_descriptive() {
        let metadata = Arc::new(RecordingMetadata::default());
        let existing = descriptive("Kept");

        let f = fetcher(ledger(&[]), metadata.clone());
        let record = f.load_one(4, Some(existing)).await.unwrap();
        assert_eq!(record.title(), "Kept");
        assert!(metadata.requested.lock().unwrap().is_empty());

        let record = f.load_one(5, None).await.unwrap();
        assert_eq!(record.title(), "Agenda 5");
        assert_eq!(*metadata.requested.lock().unwrap(), vec![5]);
    }
}
