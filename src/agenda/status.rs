//! Lifecycle phase derivation
//!
//! Pure function over `(record, quorum, now)`. Rules are evaluated in order
//! and the first match wins:
//!
//! 1. executed flag or executed timestamp set → `Executed`
//! 2. notice period running (`now < notice_end_at`) → `Notice`
//! 3. voting started and still running (`now < voting_end_at`) → `Voting`
//! 4. voting finished, quorum reached, yes > no, inside the execution
//!    window → `WaitingExecution`
//! 5. notice over but voting not recorded as started → `Voting`
//! 6. anything else → `Ended`
//!
//! Rule 5 is a deliberate leniency: the ledger only records the voting start
//! once the first vote lands, so an agenda whose notice period has elapsed is
//! shown as open for voting rather than ended.

use serde::{Deserialize, Serialize};

use super::record::AgendaRecord;

/// Derived lifecycle phase of an agenda
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Notice,
    Voting,
    WaitingExecution,
    Executed,
    Ended,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notice => "notice",
            Self::Voting => "voting",
            Self::WaitingExecution => "waiting_execution",
            Self::Executed => "executed",
            Self::Ended => "ended",
        }
    }

    /// Phases in which the agenda can still change on-chain
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Notice | Self::Voting | Self::WaitingExecution)
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the lifecycle phase of `record` at unix time `now`
pub fn derive_phase(record: &AgendaRecord, quorum: u64, now: u64) -> LifecyclePhase {
    let l = &record.ledger;

    if l.executed || l.executed_at > 0 {
        return LifecyclePhase::Executed;
    }

    if l.notice_end_at > 0 && now < l.notice_end_at {
        return LifecyclePhase::Notice;
    }

    if l.voting_started_at > 0 && now < l.voting_end_at {
        return LifecyclePhase::Voting;
    }

    if l.voting_started_at > 0 && now >= l.voting_end_at {
        let tally = l.tally();
        if tally.quorum_reached(quorum) && tally.is_passing() && now < l.executable_limit_at {
            return LifecyclePhase::WaitingExecution;
        }
    }

    if l.notice_end_at > 0 && now > l.notice_end_at && l.voting_started_at == 0 {
        return LifecyclePhase::Voting;
    }

    LifecyclePhase::Ended
}
