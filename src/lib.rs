//! Agenda Sync - governance agenda cache for an on-chain committee
//!
//! Reads agendas from the agenda manager contract over JSON-RPC, merges
//! them with off-chain metadata documents, and keeps an id-descending,
//! paginated list current by applying ledger events as they arrive.

pub mod agenda;
pub mod chain;
pub mod config;
pub mod metadata;
pub mod sync;
pub mod types;

pub use agenda::{derive_phase, AgendaRecord, LifecyclePhase};
pub use config::Args;
pub use sync::{AgendaSnapshot, PageLoad, SyncConfig, SyncContext};
pub use types::{Result, SyncError};
