//! Ledger read errors

/// Errors raised by JSON-RPC ledger reads.
///
/// Transient variants are retried by [`super::ChainReader`] and then failed
/// over to the next endpoint; the rest are returned to the caller at once.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Endpoint returned HTTP {status}")]
    Server { status: u16 },

    /// JSON-RPC error object (execution reverted, invalid params, ...)
    #[error("RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    /// Malformed response or ABI data
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No RPC endpoints configured")]
    NoEndpoints,

    /// Every endpoint failed; carries the last underlying error
    #[error("All {endpoints} endpoint(s) failed, last error: {last}")]
    Exhausted { endpoints: usize, last: Box<RpcError> },
}

impl RpcError {
    /// Whether a retry against the same endpoint may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Connection(_) => true,
            Self::Server { status } => *status >= 500,
            // -32005 is the de-facto "limit exceeded" code on public nodes
            Self::JsonRpc { code, message } => {
                *code == -32005 || *code == -32029 || message.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }

    /// Whether the failure is specific to the data returned for one record
    pub fn is_decode(&self) -> bool {
        match self {
            Self::Decode(_) => true,
            Self::Exhausted { last, .. } => last.is_decode(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                Self::RateLimited(err.to_string())
            } else {
                Self::Server {
                    status: status.as_u16(),
                }
            }
        } else {
            Self::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RpcError::Timeout("a".into()).is_transient());
        assert!(RpcError::RateLimited("a".into()).is_transient());
        assert!(RpcError::Server { status: 502 }.is_transient());
        assert!(!RpcError::Server { status: 404 }.is_transient());
        assert!(!RpcError::Decode("x".into()).is_transient());
        assert!(RpcError::JsonRpc {
            code: -32000,
            message: "daily Rate Limit exceeded".into()
        }
        .is_transient());
        assert!(!RpcError::JsonRpc {
            code: 3,
            message: "execution reverted".into()
        }
        .is_transient());
    }

    #[test]
    fn test_exhausted_keeps_decode_nature() {
        let err = RpcError::Exhausted {
            endpoints: 2,
            last: Box::new(RpcError::Decode("short".into())),
        };
        assert!(err.is_decode());
        assert!(!err.is_transient());
    }
}
