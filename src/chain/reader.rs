//! Chain Reader - retrying, failover-aware ledger reads
//!
//! The only component that talks to RPC endpoints. Each request is tried
//! against the endpoints in configured order:
//!
//! 1. Transient failures (timeout, rate limit, connection reset, 5xx) are
//!    retried on the same endpoint with exponential backoff
//! 2. When an endpoint runs out of attempts the next endpoint is tried
//! 3. Non-transient failures (reverts, malformed data) return immediately
//!
//! Callers always get a typed [`RpcError`]; nothing is swallowed here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use super::abi;
use super::error::RpcError;
use super::events::{LogFilter, RawLog};
use super::rpc::RpcTransport;
use crate::agenda::LedgerFields;

/// `numAgendas()` on the agenda manager
pub const NUM_AGENDAS_SIG: &str = "numAgendas()";
/// `getAgendaData(uint256)` on the agenda manager
pub const GET_AGENDA_SIG: &str = "getAgendaData(uint256)";
/// `quorum()` on the committee
pub const QUORUM_SIG: &str = "quorum()";

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy applied per endpoint
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per endpoint, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Contract addresses the reader targets
#[derive(Debug, Clone)]
pub struct ContractAddresses {
    /// Agenda manager (agenda storage and count)
    pub agenda_manager: String,
    /// Committee (quorum, member changes)
    pub committee: String,
}

// =============================================================================
// Ledger Reader Trait
// =============================================================================

/// Read side of the ledger as seen by the sync pipeline
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Ledger fields for agenda `id` at the latest block
    async fn read_record(&self, id: u64) -> Result<LedgerFields, RpcError>;

    /// Ledger fields for agenda `id` as of `block`
    async fn read_record_at(&self, id: u64, block: u64) -> Result<LedgerFields, RpcError>;

    /// Number of agendas ever created (ids are `0..count`)
    async fn read_count(&self) -> Result<u64, RpcError>;

    /// Minimum total votes for an agenda to be executable
    async fn read_quorum(&self) -> Result<u64, RpcError>;

    /// Input bytes of a transaction
    async fn read_transaction_input(&self, hash: &str) -> Result<Vec<u8>, RpcError>;
}

// =============================================================================
// Chain Reader
// =============================================================================

/// Retrying JSON-RPC reader over one or more endpoints
pub struct ChainReader {
    transports: Vec<Arc<dyn RpcTransport>>,
    contracts: ContractAddresses,
    retry: RetryPolicy,
}

impl ChainReader {
    /// Create a reader; endpoints are tried in the given order
    pub fn new(
        transports: Vec<Arc<dyn RpcTransport>>,
        contracts: ContractAddresses,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transports,
            contracts,
            retry,
        }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    pub fn endpoint_count(&self) -> usize {
        self.transports.len()
    }

    /// Send a request with retries, failing over across endpoints
    pub async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, RpcError> {
        if self.transports.is_empty() {
            return Err(RpcError::NoEndpoints);
        }

        let mut last_error = None;
        for transport in &self.transports {
            match self.request_with_retry(transport.as_ref(), method, &params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        endpoint = %transport.endpoint(),
                        method,
                        error = %e,
                        "Endpoint exhausted retries, failing over"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RpcError::Exhausted {
            endpoints: self.transports.len(),
            last: Box::new(last_error.unwrap_or(RpcError::NoEndpoints)),
        })
    }

    async fn request_with_retry(
        &self,
        transport: &dyn RpcTransport,
        method: &str,
        params: &JsonValue,
    ) -> Result<JsonValue, RpcError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match transport.request(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        endpoint = %transport.endpoint(),
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient RPC failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `eth_call` returning the raw hex result
    async fn call(&self, to: &str, data: String, block: Option<u64>) -> Result<String, RpcError> {
        let tag = block
            .map(abi::to_quantity)
            .unwrap_or_else(|| "latest".to_string());
        let result = self
            .request("eth_call", json!([{ "to": to, "data": data }, tag]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode("eth_call result is not a string".to_string()))
    }

    /// Latest block number
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("eth_blockNumber result is not a string".to_string()))?;
        abi::parse_quantity(quantity)
    }

    /// Logs matching `filter` over its inclusive block range
    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let result = self.request("eth_getLogs", json!([filter.to_params()])).await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::Decode(format!("invalid eth_getLogs result: {}", e)))
    }

    async fn read_agenda(&self, id: u64, block: Option<u64>) -> Result<LedgerFields, RpcError> {
        let data = abi::encode_call(GET_AGENDA_SIG, &[id]);
        let raw = self.call(&self.contracts.agenda_manager, data, block).await?;
        abi::decode_agenda(&raw)
    }
}

#[async_trait]
impl LedgerReader for ChainReader {
    async fn read_record(&self, id: u64) -> Result<LedgerFields, RpcError> {
        self.read_agenda(id, None).await
    }

    async fn read_record_at(&self, id: u64, block: u64) -> Result<LedgerFields, RpcError> {
        self.read_agenda(id, Some(block)).await
    }

    async fn read_count(&self) -> Result<u64, RpcError> {
        let data = abi::encode_call(NUM_AGENDAS_SIG, &[]);
        let raw = self.call(&self.contracts.agenda_manager, data, None).await?;
        abi::decode_u64(&raw)
    }

    async fn read_quorum(&self) -> Result<u64, RpcError> {
        let data = abi::encode_call(QUORUM_SIG, &[]);
        let raw = self.call(&self.contracts.committee, data, None).await?;
        abi::decode_u64(&raw)
    }

    async fn read_transaction_input(&self, hash: &str) -> Result<Vec<u8>, RpcError> {
        let result = self
            .request("eth_getTransactionByHash", json!([hash]))
            .await?;
        if result.is_null() {
            return Err(RpcError::NotFound(format!("transaction {}", hash)));
        }
        let input = result
            .get("input")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| RpcError::Decode("transaction has no input".to_string()))?;
        abi::decode_hex(input)
    }
}
