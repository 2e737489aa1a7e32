//! Ledger Events - log polling subscription
//!
//! Agenda lifecycle changes are emitted as contract logs. [`LogPoller`]
//! turns `eth_getLogs` polling into a push subscription of typed
//! [`LedgerEvent`]s, one independent polling task per subscriber.
//!
//! ## Catch-up
//!
//! On every tick the poller reads the head block and walks the gap since the
//! last processed block in chunks of `max_block_span`. The walk checks the
//! cancellation token between chunks and the inter-chunk delay is itself
//! interruptible.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::abi;
use super::error::RpcError;
use super::reader::ChainReader;
use crate::types::{Result, SyncError};

/// `AgendaCreated(address indexed from, uint256 indexed id, address[] targets,
/// uint128 noticePeriodSeconds, uint128 votingPeriodSeconds, bool atomicExecute)`
pub const AGENDA_CREATED_SIG: &str = "AgendaCreated(address,uint256,address[],uint128,uint128,bool)";
/// `AgendaVoteCasted(address indexed from, uint256 indexed id, uint256 voting, string comment)`
pub const AGENDA_VOTE_CAST_SIG: &str = "AgendaVoteCasted(address,uint256,uint256,string)";
/// `AgendaExecuted(uint256 indexed id, address[] target)`
pub const AGENDA_EXECUTED_SIG: &str = "AgendaExecuted(uint256,address[])";
/// `ChangedMember(uint256 indexed slotIndex, address prevMember, address indexed newMember)`
pub const MEMBER_CHANGED_SIG: &str = "ChangedMember(uint256,address,address)";

// =============================================================================
// Event Types
// =============================================================================

/// Kinds of ledger notifications the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    VoteCast,
    Executed,
    MemberChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::VoteCast,
        EventKind::Executed,
        EventKind::MemberChanged,
    ];

    pub fn signature(&self) -> &'static str {
        match self {
            Self::Created => AGENDA_CREATED_SIG,
            Self::VoteCast => AGENDA_VOTE_CAST_SIG,
            Self::Executed => AGENDA_EXECUTED_SIG,
            Self::MemberChanged => MEMBER_CHANGED_SIG,
        }
    }

    pub fn topic(&self) -> String {
        abi::event_topic(self.signature())
    }

    fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.topic().eq_ignore_ascii_case(topic))
    }
}

/// Decoded payload of a ledger notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEventKind {
    AgendaCreated { id: u64 },
    VoteCast { id: u64, voter: String },
    AgendaExecuted { id: u64 },
    MemberChanged { slot: u64 },
}

impl LedgerEventKind {
    /// Agenda affected by this event, if any
    pub fn agenda_id(&self) -> Option<u64> {
        match self {
            Self::AgendaCreated { id } | Self::VoteCast { id, .. } | Self::AgendaExecuted { id } => {
                Some(*id)
            }
            Self::MemberChanged { .. } => None,
        }
    }
}

/// A ledger notification with its log position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<String>,
}

/// Log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
}

impl RawLog {
    /// Decode into a typed event; `Ok(None)` for logs of other events
    pub fn decode(&self) -> std::result::Result<Option<LedgerEvent>, RpcError> {
        let Some(topic0) = self.topics.first() else {
            return Ok(None);
        };
        let Some(kind) = EventKind::from_topic(topic0) else {
            return Ok(None);
        };

        let topic = |i: usize| {
            self.topics
                .get(i)
                .ok_or_else(|| RpcError::Decode(format!("{:?} log missing topic {}", kind, i)))
        };

        let decoded = match kind {
            EventKind::Created => LedgerEventKind::AgendaCreated {
                id: abi::topic_to_u64(topic(2)?)?,
            },
            EventKind::VoteCast => LedgerEventKind::VoteCast {
                id: abi::topic_to_u64(topic(2)?)?,
                voter: abi::topic_to_address(topic(1)?)?,
            },
            EventKind::Executed => LedgerEventKind::AgendaExecuted {
                id: abi::topic_to_u64(topic(1)?)?,
            },
            EventKind::MemberChanged => LedgerEventKind::MemberChanged {
                slot: abi::topic_to_u64(topic(1)?)?,
            },
        };

        Ok(Some(LedgerEvent {
            kind: decoded,
            block_number: self
                .block_number
                .as_deref()
                .map(abi::parse_quantity)
                .transpose()?
                .unwrap_or(0),
            log_index: self
                .log_index
                .as_deref()
                .map(abi::parse_quantity)
                .transpose()?
                .unwrap_or(0),
            transaction_hash: self.transaction_hash.clone(),
        }))
    }
}

/// `eth_getLogs` filter over an inclusive block range
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub addresses: Vec<String>,
    /// Accepted values for topic 0
    pub topics: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn to_params(&self) -> JsonValue {
        json!({
            "address": self.addresses,
            "topics": [self.topics],
            "fromBlock": abi::to_quantity(self.from_block),
            "toBlock": abi::to_quantity(self.to_block),
        })
    }
}

// =============================================================================
// Event Source
// =============================================================================

/// Item delivered on a subscription channel
pub type EventNotification = Result<LedgerEvent>;

/// Push subscription over ledger notifications
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start a subscription for `kinds`. The subscription stops when `cancel`
    /// fires or the receiver is dropped.
    async fn subscribe(
        &self,
        kinds: &[EventKind],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EventNotification>>;
}

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between head checks
    pub poll_interval: Duration,
    /// Maximum blocks per `eth_getLogs` request
    pub max_block_span: u64,
    /// Delay between catch-up chunks
    pub chunk_delay: Duration,
    /// First block to scan; `None` starts at the current head
    pub start_block: Option<u64>,
    /// Subscription channel capacity
    pub buffer_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(12),
            max_block_span: 2_000,
            chunk_delay: Duration::from_millis(250),
            start_block: None,
            buffer_size: 256,
        }
    }
}

/// `eth_getLogs` polling implementation of [`EventSource`]
#[derive(Clone)]
pub struct LogPoller {
    reader: Arc<ChainReader>,
    config: PollerConfig,
}

impl LogPoller {
    pub fn new(reader: Arc<ChainReader>, config: PollerConfig) -> Self {
        Self { reader, config }
    }

    fn filter(&self, kinds: &[EventKind], from_block: u64, to_block: u64) -> LogFilter {
        let contracts = self.reader.contracts();
        LogFilter {
            addresses: vec![contracts.agenda_manager.clone(), contracts.committee.clone()],
            topics: kinds.iter().map(EventKind::topic).collect(),
            from_block,
            to_block,
        }
    }

    /// Walk `[from_block, to_block]` in chunks, sending decoded events in
    /// log order. Returns the last fully processed block.
    pub async fn catch_up(
        &self,
        kinds: &[EventKind],
        from_block: u64,
        to_block: u64,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<EventNotification>,
    ) -> Result<u64> {
        let span = self.config.max_block_span.max(1);
        let mut start = from_block;

        while start <= to_block {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let end = start.saturating_add(span - 1).min(to_block);
            let mut logs = self.reader.get_logs(&self.filter(kinds, start, end)).await?;
            logs.sort_by_key(|log| {
                (
                    log.block_number.as_deref().and_then(|b| abi::parse_quantity(b).ok()),
                    log.log_index.as_deref().and_then(|i| abi::parse_quantity(i).ok()),
                )
            });

            debug!(from = start, to = end, logs = logs.len(), "Scanned log range");

            for log in logs {
                let item = match log.decode() {
                    Ok(Some(event)) => Ok(event),
                    Ok(None) => continue,
                    Err(e) => Err(SyncError::Subscription(format!("undecodable log: {}", e))),
                };
                if tx.send(item).await.is_err() {
                    return Err(SyncError::Cancelled);
                }
            }

            if end == to_block {
                return Ok(end);
            }
            start = end + 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.config.chunk_delay) => {}
            }
        }

        Ok(to_block)
    }

    async fn run(
        self,
        kinds: Vec<EventKind>,
        mut next_block: u64,
        cancel: CancellationToken,
        tx: mpsc::Sender<EventNotification>,
    ) {
        info!(from_block = next_block, "Log poller started");

        loop {
            match self.reader.block_number().await {
                Ok(head) if head >= next_block => {
                    match self.catch_up(&kinds, next_block, head, &cancel, &tx).await {
                        Ok(done) => next_block = done + 1,
                        Err(SyncError::Cancelled) => break,
                        Err(e) => {
                            warn!(error = %e, from_block = next_block, "Log catch-up failed");
                            let notice = SyncError::Subscription(e.to_string());
                            if tx.send(Err(notice)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Head block read failed");
                    if tx
                        .send(Err(SyncError::Subscription(e.to_string())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Log poller stopped");
    }
}

#[async_trait]
impl EventSource for LogPoller {
    async fn subscribe(
        &self,
        kinds: &[EventKind],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EventNotification>> {
        let start = match self.config.start_block {
            Some(block) => block,
            None => self.reader.block_number().await? + 1,
        };

        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));
        tokio::spawn(self.clone().run(kinds.to_vec(), start, cancel, tx));
        Ok(rx)
    }
}
