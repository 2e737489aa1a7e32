//! Quorum tracker - cached committee quorum with debounced refresh
//!
//! Member changes tend to arrive in bursts (one per rotated slot), so a
//! refresh is scheduled through a [`Debouncer`] instead of read per event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::debounce::Debouncer;
use crate::chain::LedgerReader;
use crate::types::Result;

/// Sentinel for "not read yet"
const UNKNOWN: u64 = u64::MAX;

pub struct QuorumTracker {
    ledger: Arc<dyn LedgerReader>,
    value: AtomicU64,
    debouncer: Debouncer,
}

impl QuorumTracker {
    pub fn new(ledger: Arc<dyn LedgerReader>, debounce: Duration) -> Self {
        Self {
            ledger,
            value: AtomicU64::new(UNKNOWN),
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Cached quorum, if it has been read
    pub fn current(&self) -> Option<u64> {
        match self.value.load(Ordering::Acquire) {
            UNKNOWN => None,
            quorum => Some(quorum),
        }
    }

    /// Read the quorum from the ledger and cache it
    pub async fn refresh(&self) -> Result<u64> {
        let quorum = self.ledger.read_quorum().await?;
        let previous = self.value.swap(quorum, Ordering::AcqRel);
        if previous != quorum {
            info!(quorum, "Committee quorum updated");
        }
        Ok(quorum)
    }

    /// Cached quorum, reading it on first use
    pub async fn get(&self) -> Result<u64> {
        match self.current() {
            Some(quorum) => Ok(quorum),
            None => self.refresh().await,
        }
    }

    /// Refresh after the debounce delay; repeated calls collapse into one read
    pub fn schedule_refresh(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        self.debouncer.call(async move {
            if let Err(e) = tracker.refresh().await {
                warn!(error = %e, "Quorum refresh failed");
            }
        });
    }

    pub fn cancel_pending(&self) -> bool {
        self.debouncer.cancel()
    }
}
