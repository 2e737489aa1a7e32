//! Minimal ABI support for the agenda read path
//!
//! Only what the read side needs: function selectors, `uint256` call
//! arguments, and decoding of return words and event topics. Outgoing
//! transaction encoding is not handled here.

use sha3::{Digest, Keccak256};

use super::error::RpcError;
use crate::agenda::{LedgerFields, LedgerResult, LedgerStatus};

const WORD: usize = 32;

/// Number of head slots in the `Agenda` tuple returned by `getAgendaData`
const AGENDA_SLOTS: usize = 14;

/// First four bytes of the Keccak-256 hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Full Keccak-256 hash of an event signature, as a `0x` topic string
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// Encode a call with only `uint256` arguments
pub fn encode_call(signature: &str, args: &[u64]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        let mut word = [0u8; WORD];
        word[WORD - 8..].copy_from_slice(&arg.to_be_bytes());
        data.extend_from_slice(&word);
    }
    format!("0x{}", hex::encode(data))
}

/// Strip an optional `0x` prefix and decode hex
pub fn decode_hex(value: &str) -> Result<Vec<u8>, RpcError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|e| RpcError::Decode(format!("invalid hex: {}", e)))
}

/// Parse a JSON-RPC quantity (`0x1a`) into a u64
pub fn parse_quantity(value: &str) -> Result<u64, RpcError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    if trimmed.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| RpcError::Decode(format!("invalid quantity {}: {}", value, e)))
}

/// Format a u64 as a JSON-RPC quantity
pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

// =============================================================================
// Return Data
// =============================================================================

/// Read-only view over ABI-encoded return data
pub struct AbiWords {
    data: Vec<u8>,
}

impl AbiWords {
    pub fn from_hex(value: &str) -> Result<Self, RpcError> {
        Ok(Self {
            data: decode_hex(value)?,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn word_at(&self, offset: usize) -> Result<&[u8], RpcError> {
        let end = offset
            .checked_add(WORD)
            .ok_or_else(|| RpcError::Decode("word offset overflow".to_string()))?;
        self.data.get(offset..end).ok_or_else(|| {
            RpcError::Decode(format!(
                "word at byte {} out of range ({} bytes)",
                offset,
                self.data.len()
            ))
        })
    }

    /// Read a `uint` word that must fit in 64 bits
    pub fn u64_at(&self, offset: usize) -> Result<u64, RpcError> {
        word_to_u64(self.word_at(offset)?)
    }

    pub fn bool_at(&self, offset: usize) -> Result<bool, RpcError> {
        match self.u64_at(offset)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RpcError::Decode(format!("invalid bool word {}", other))),
        }
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, RpcError> {
        let value = self.u64_at(offset)?;
        u8::try_from(value).map_err(|_| RpcError::Decode(format!("invalid enum word {}", value)))
    }

    pub fn address_at(&self, offset: usize) -> Result<String, RpcError> {
        word_to_address(self.word_at(offset)?)
    }

    /// Read a word used as a byte offset or length
    pub fn usize_at(&self, offset: usize) -> Result<usize, RpcError> {
        let value = self.u64_at(offset)?;
        usize::try_from(value)
            .map_err(|_| RpcError::Decode(format!("offset word {} does not fit", value)))
    }

    /// Read a dynamic `address[]` whose length word sits at `offset`
    pub fn address_array_at(&self, offset: usize) -> Result<Vec<String>, RpcError> {
        let len = self.usize_at(offset)?;
        let items = checked_offset(offset, WORD, 1)?;
        let available = self.data.len().saturating_sub(items) / WORD;
        if len > available {
            return Err(RpcError::Decode(format!(
                "address array claims {} items, only {} words present",
                len, available
            )));
        }
        (0..len)
            .map(|i| self.address_at(checked_offset(items, WORD, i)?))
            .collect()
    }
}

/// `base + WORD * index`, failing on overflow
fn checked_offset(base: usize, word: usize, index: usize) -> Result<usize, RpcError> {
    word.checked_mul(index)
        .and_then(|delta| base.checked_add(delta))
        .ok_or_else(|| RpcError::Decode(format!("offset overflow at base {}", base)))
}

fn word_to_u64(word: &[u8]) -> Result<u64, RpcError> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(RpcError::Decode("uint value does not fit in 64 bits".to_string()));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(buf))
}

fn word_to_address(word: &[u8]) -> Result<String, RpcError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(RpcError::Decode("address word has dirty high bytes".to_string()));
    }
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

/// Decode a single `uint256` return value
pub fn decode_u64(value: &str) -> Result<u64, RpcError> {
    AbiWords::from_hex(value)?.u64_at(0)
}

/// Decode an indexed `uint256` event topic
pub fn topic_to_u64(topic: &str) -> Result<u64, RpcError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != WORD {
        return Err(RpcError::Decode(format!("topic has {} bytes", bytes.len())));
    }
    word_to_u64(&bytes)
}

/// Decode an indexed `address` event topic
pub fn topic_to_address(topic: &str) -> Result<String, RpcError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != WORD {
        return Err(RpcError::Decode(format!("topic has {} bytes", bytes.len())));
    }
    word_to_address(&bytes)
}

/// Decode the `Agenda` tuple returned by `getAgendaData(uint256)`.
///
/// Layout: an offset word pointing at the tuple, then fourteen head slots
/// (ten uints, status, result, voters offset, executed) and the voters array
/// tail. Duplicate voters are dropped keeping first occurrence.
pub fn decode_agenda(value: &str) -> Result<LedgerFields, RpcError> {
    let words = AbiWords::from_hex(value)?;
    if words.len() < WORD * (AGENDA_SLOTS + 1) {
        return Err(RpcError::Decode(format!(
            "agenda data too short: {} bytes",
            words.len()
        )));
    }

    let base = words.usize_at(0)?;
    let slot = |i: usize| checked_offset(base, WORD, i);

    let status_raw = words.u8_at(slot(10)?)?;
    let result_raw = words.u8_at(slot(11)?)?;
    let status = LedgerStatus::from_u8(status_raw)
        .ok_or_else(|| RpcError::Decode(format!("unknown agenda status {}", status_raw)))?;
    let result = LedgerResult::from_u8(result_raw)
        .ok_or_else(|| RpcError::Decode(format!("unknown agenda result {}", result_raw)))?;

    let voters_offset = words.usize_at(slot(12)?)?;
    let voters_at = checked_offset(base, voters_offset, 1)?;
    let mut voters: Vec<String> = Vec::new();
    for voter in words.address_array_at(voters_at)? {
        if !voters.contains(&voter) {
            voters.push(voter);
        }
    }

    Ok(LedgerFields {
        created_at: words.u64_at(slot(0)?)?,
        notice_end_at: words.u64_at(slot(1)?)?,
        voting_period_secs: words.u64_at(slot(2)?)?,
        voting_started_at: words.u64_at(slot(3)?)?,
        voting_end_at: words.u64_at(slot(4)?)?,
        executable_limit_at: words.u64_at(slot(5)?)?,
        executed_at: words.u64_at(slot(6)?)?,
        yes_votes: words.u64_at(slot(7)?)?,
        no_votes: words.u64_at(slot(8)?)?,
        abstain_votes: words.u64_at(slot(9)?)?,
        voters,
        executed: words.bool_at(slot(13)?)?,
        status,
        result,
    })
}

/// Test helper: build the `getAgendaData` return payload for `fields`
#[cfg(test)]
pub(crate) fn encode_agenda_for_test(fields: &LedgerFields) -> String {
    fn uint(v: u64) -> [u8; WORD] {
        let mut w = [0u8; WORD];
        w[WORD - 8..].copy_from_slice(&v.to_be_bytes());
        w
    }
    let status = match fields.status {
        LedgerStatus::None => 0,
        LedgerStatus::Notice => 1,
        LedgerStatus::Voting => 2,
        LedgerStatus::WaitingExec => 3,
        LedgerStatus::Executed => 4,
        LedgerStatus::Ended => 5,
    };
    let result = match fields.result {
        LedgerResult::Pending => 0,
        LedgerResult::Accept => 1,
        LedgerResult::Reject => 2,
        LedgerResult::Dismiss => 3,
    };
    let mut out = Vec::new();
    out.extend_from_slice(&uint(WORD as u64));
    for v in [
        fields.created_at,
        fields.notice_end_at,
        fields.voting_period_secs,
        fields.voting_started_at,
        fields.voting_end_at,
        fields.executable_limit_at,
        fields.executed_at,
        fields.yes_votes,
        fields.no_votes,
        fields.abstain_votes,
        status,
        result,
        (WORD * AGENDA_SLOTS) as u64,
        fields.executed as u64,
    ] {
        out.extend_from_slice(&uint(v));
    }
    out.extend_from_slice(&uint(fields.voters.len() as u64));
    for voter in &fields.voters {
        let bytes = decode_hex(voter).unwrap_or_default();
        let mut w = [0u8; WORD];
        w[WORD - bytes.len()..].copy_from_slice(&bytes);
        out.extend_from_slice(&w);
    }
    format!("0x{}", hex::encode(out))
}
