//! Agenda record model
//!
//! A record joins two halves with different lifecycles:
//! - [`LedgerFields`]: read from the agenda manager contract, replaced only by
//!   a newer read of the same id
//! - [`DescriptiveFields`]: read from the metadata store, optional, replaced
//!   wholesale on refresh

use serde::{Deserialize, Serialize};

// =============================================================================
// Ledger Enums
// =============================================================================

/// Status enum as stored by the agenda manager contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    #[default]
    None,
    Notice,
    Voting,
    WaitingExec,
    Executed,
    Ended,
}

impl LedgerStatus {
    /// Decode the contract's `uint8` representation
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Notice),
            2 => Some(Self::Voting),
            3 => Some(Self::WaitingExec),
            4 => Some(Self::Executed),
            5 => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Result enum as stored by the agenda manager contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerResult {
    #[default]
    Pending,
    Accept,
    Reject,
    Dismiss,
}

impl LedgerResult {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Accept),
            2 => Some(Self::Reject),
            3 => Some(Self::Dismiss),
            _ => None,
        }
    }
}

// =============================================================================
// Ledger Fields
// =============================================================================

/// Immutable on-chain half of an agenda.
///
/// Timestamps are unix seconds; zero means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFields {
    pub created_at: u64,
    pub notice_end_at: u64,
    pub voting_period_secs: u64,
    pub voting_started_at: u64,
    pub voting_end_at: u64,
    pub executable_limit_at: u64,
    pub executed_at: u64,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub abstain_votes: u64,
    /// Voter addresses in ledger order, lowercase hex, no duplicates
    pub voters: Vec<String>,
    pub executed: bool,
    pub status: LedgerStatus,
    pub result: LedgerResult,
}

impl LedgerFields {
    /// Vote tally view over the three counters
    pub fn tally(&self) -> VoteTally {
        VoteTally {
            yes: self.yes_votes,
            no: self.no_votes,
            abstain: self.abstain_votes,
        }
    }

    /// Whether `address` appears among the recorded voters
    pub fn has_voted(&self, address: &str) -> bool {
        self.voters.iter().any(|v| v.eq_ignore_ascii_case(address))
    }
}

/// Yes / no / abstain counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub yes: u64,
    pub no: u64,
    pub abstain: u64,
}

impl VoteTally {
    pub fn total(&self) -> u64 {
        self.yes.saturating_add(self.no).saturating_add(self.abstain)
    }

    pub fn quorum_reached(&self, quorum: u64) -> bool {
        self.total() >= quorum
    }

    /// Strictly more yes than no
    pub fn is_passing(&self) -> bool {
        self.yes > self.no
    }
}

// =============================================================================
// Descriptive Fields
// =============================================================================

/// Who submitted the agenda metadata.
///
/// The wire format carries either a bare address string or an object with an
/// optional signature; both are resolved into this type at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Creator {
    Address { address: String },
    Signed { address: String, signature: String },
}

impl Creator {
    pub fn address(&self) -> &str {
        match self {
            Self::Address { address } | Self::Signed { address, .. } => address,
        }
    }

    pub fn signature(&self) -> Option<&str> {
        match self {
            Self::Address { .. } => None,
            Self::Signed { signature, .. } => Some(signature),
        }
    }
}

/// Links to off-chain discussion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discourse_url: Option<String>,
}

/// One on-chain action an agenda will execute, as described by its metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "contractAddress", skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<String>,
}

/// Mutable off-chain half of an agenda
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptiveFields {
    pub title: String,
    pub description: String,
    pub creator: Creator,
    pub network: String,
    #[serde(default)]
    pub external_links: ExternalLinks,
    /// Hash of the transaction that created the agenda
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_transaction_hash: Option<String>,
    #[serde(default)]
    pub actions: Vec<AgendaAction>,
}

// =============================================================================
// Agenda Record
// =============================================================================

/// A single governance agenda: ledger fields plus optional metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaRecord {
    pub id: u64,
    pub ledger: LedgerFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptive: Option<DescriptiveFields>,
}

impl AgendaRecord {
    /// Merge a ledger read with whatever metadata is available
    pub fn merge(id: u64, ledger: LedgerFields, descriptive: Option<DescriptiveFields>) -> Self {
        Self {
            id,
            ledger,
            descriptive,
        }
    }

    /// Title from metadata, or the `Agenda #<id>` placeholder
    pub fn title(&self) -> String {
        match &self.descriptive {
            Some(d) if !d.title.is_empty() => d.title.clone(),
            _ => placeholder_title(self.id),
        }
    }

    /// Description from metadata, or empty
    pub fn description(&self) -> &str {
        self.descriptive
            .as_ref()
            .map(|d| d.description.as_str())
            .unwrap_or("")
    }

    pub fn has_metadata(&self) -> bool {
        self.descriptive.is_some()
    }
}

pub fn placeholder_title(id: u64) -> String {
    format!("Agenda #{}", id)
}
