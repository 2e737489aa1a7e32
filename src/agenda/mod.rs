//! Agenda data model and derived status

pub mod record;
pub mod status;

pub use record::{
    AgendaAction, AgendaRecord, Creator, DescriptiveFields, ExternalLinks, LedgerFields,
    LedgerResult, LedgerStatus, VoteTally,
};
pub use status::{derive_phase, LifecyclePhase};
