use chrono::{DateTime, Utc};
use ferry_protocol::FileIdentity;
use serde::{Deserialize, Serialize};

/// Lifecycle of a progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress,
    Complete,
}

/// Persisted progress of one file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub identity: FileIdentity,
    /// Bytes known to be durably written to the partial file.
    pub bytes_received: u64,
    pub status: TransferStatus,
    /// Set when the final digest check failed. A corrupt record is never
    /// resumed; the next attempt starts from zero.
    #[serde(default)]
    pub corrupt: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// A fresh record at offset zero.
    pub fn new(identity: FileIdentity) -> Self {
        Self {
            identity,
            bytes_received: 0,
            status: TransferStatus::InProgress,
            corrupt: false,
            updated_at: Utc::now(),
        }
    }

    /// Whether a new session may continue from `bytes_received`.
    pub fn is_resumable(&self) -> bool {
        self.status == TransferStatus::InProgress
            && !self.corrupt
            && self.bytes_received <= self.identity.size
    }

    /// Ledger key of this record.
    pub fn key(&self) -> String {
        self.identity.key()
    }
}
