//! Ledger access: JSON-RPC transport, retrying reader, log subscriptions

pub mod abi;
pub mod error;
pub mod events;
pub mod reader;
pub mod rpc;

pub use error::RpcError;
pub use events::{
    EventKind, EventNotification, EventSource, LedgerEvent, LedgerEventKind, LogPoller,
    PollerConfig,
};
pub use reader::{ChainReader, ContractAddresses, LedgerReader, RetryPolicy};
pub use rpc::{HttpRpcTransport, RpcTransport};
