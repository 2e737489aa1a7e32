//! Metadata document wire format
//!
//! `GET {base}/{network}/agenda-{id}.json` returns one of these. The
//! `creator` member is either a bare address or an object; [`CreatorWire`]
//! accepts both and converts into the tagged [`Creator`].

use serde::Deserialize;

use crate::agenda::{AgendaAction, Creator, DescriptiveFields, ExternalLinks};

/// Creator as it appears on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatorWire {
    Bare(String),
    Object {
        address: String,
        #[serde(default)]
        signature: Option<String>,
    },
}

impl From<CreatorWire> for Creator {
    fn from(wire: CreatorWire) -> Self {
        match wire {
            CreatorWire::Bare(address) => Creator::Address { address },
            CreatorWire::Object {
                address,
                signature: Some(signature),
            } if !signature.is_empty() => Creator::Signed { address, signature },
            CreatorWire::Object { address, .. } => Creator::Address { address },
        }
    }
}

/// Agenda metadata document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaMetadataDocument {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub creator: CreatorWire,
    #[serde(default)]
    pub network: String,
    /// Creating transaction hash
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub actions: Vec<AgendaAction>,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub discourse_url: Option<String>,
}

impl AgendaMetadataDocument {
    pub fn into_descriptive(self) -> DescriptiveFields {
        DescriptiveFields {
            title: self.title,
            description: self.description,
            creator: self.creator.into(),
            network: self.network,
            external_links: ExternalLinks {
                snapshot_url: non_empty(self.snapshot_url),
                discourse_url: non_empty(self.discourse_url),
            },
            source_transaction_hash: non_empty(self.transaction),
            actions: self.actions,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
