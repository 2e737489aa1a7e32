//! JSON-RPC transport
//!
//! One [`RpcTransport`] per endpoint. The transport performs a single
//! request and classifies failures; retries and failover live in
//! [`super::ChainReader`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::error::RpcError;

/// A single JSON-RPC endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Endpoint identifier for logs
    fn endpoint(&self) -> &str;

    /// Send one request and return the `result` member
    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, RpcError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: JsonValue,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP
pub struct HttpRpcTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    /// Create a transport for `url` with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, RpcError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(endpoint = %self.url, method, "JSON-RPC request");

        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::RateLimited(self.url.clone()));
        }
        if !status.is_success() {
            return Err(RpcError::Server {
                status: status.as_u16(),
            });
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("invalid JSON-RPC response: {}", e)))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::JsonRpc {
                code: err.code,
                message: err.message,
            });
        }

        parsed
            .result
            .ok_or_else(|| RpcError::Decode(format!("{} response has no result", method)))
    }
}
