//! Per-identity exclusive leases.

use std::sync::Arc;

use tracing::debug;

use crate::ledger::ResumeLedger;

/// Exclusive right to mutate one file identity's record and partial file.
///
/// Released when dropped.
#[derive(Debug)]
pub struct Claim {
    ledger: Arc<ResumeLedger>,
    key: String,
}

impl Claim {
    pub(crate) fn new(ledger: Arc<ResumeLedger>, key: String) -> Self {
        Self { ledger, key }
    }

    /// Ledger key this claim covers.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.ledger.release(&self.key);
        debug!(key = %self.key, "ledger claim released");
    }
}
