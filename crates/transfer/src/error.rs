use ferry_identity::IdentityError;
use ferry_ledger::LedgerError;
use ferry_protocol::{RejectCode, WireError};

/// Errors produced by a transfer session or its drivers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The handshake failed or the peer's key is not trusted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Key material could not be loaded.
    #[error("key error: {0}")]
    Key(String),

    /// Malformed frame, unexpected message, bad name or overrun.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Whole-file digest mismatch.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Transport failure.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Local disk failure on the source or partial file.
    #[error("storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("ledger error: {0}")]
    Ledger(#[source] LedgerError),

    /// The receiver asked to resume past the end of the sender's file.
    #[error("resume conflict: receiver offset {offset} exceeds source length {source_len}")]
    ResumeConflict { offset: u64, source_len: u64 },

    /// Another session owns this file identity.
    #[error("transfer {0} is busy in another session")]
    Busy(String),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("cancelled")]
    Cancelled,

    /// The receiver refused the session.
    #[error("receiver rejected the transfer ({code}): {reason}")]
    Rejected { code: RejectCode, reason: String },
}

/// Coarse failure class, used for exit codes and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Authentication,
    LocalIo,
    Integrity,
    Protocol,
}

impl FailureKind {
    /// Process exit code reported by the command-line tools.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::Network => 1,
            FailureKind::Authentication => 2,
            FailureKind::LocalIo => 3,
            FailureKind::Integrity => 4,
            FailureKind::Protocol => 5,
        }
    }
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Authentication(_) => FailureKind::Authentication,
            TransferError::Key(_) | TransferError::Storage(_) | TransferError::Ledger(_) => {
                FailureKind::LocalIo
            }
            TransferError::Protocol(_) | TransferError::ResumeConflict { .. } => {
                FailureKind::Protocol
            }
            TransferError::Integrity(_) => FailureKind::Integrity,
            TransferError::Io(_)
            | TransferError::Busy(_)
            | TransferError::ConnectionClosed
            | TransferError::Timeout(_)
            | TransferError::Cancelled => FailureKind::Network,
            TransferError::Rejected { code, .. } => match code {
                RejectCode::Busy => FailureKind::Network,
                RejectCode::Integrity => FailureKind::Integrity,
                RejectCode::Protocol => FailureKind::Protocol,
                RejectCode::Io => FailureKind::LocalIo,
            },
        }
    }

    /// Whether a fresh connection may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_)
                | TransferError::ConnectionClosed
                | TransferError::Timeout(_)
                | TransferError::Busy(_)
                | TransferError::Rejected {
                    code: RejectCode::Busy,
                    ..
                }
        )
    }

    /// Code the receiver reports to the sender before closing, if any.
    ///
    /// Transport failures get none: the peer is gone or the stream is
    /// unusable.
    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            TransferError::Busy(_) => Some(RejectCode::Busy),
            TransferError::Integrity(_) => Some(RejectCode::Integrity),
            TransferError::Protocol(_) | TransferError::ResumeConflict { .. } => {
                Some(RejectCode::Protocol)
            }
            TransferError::Storage(_) | TransferError::Ledger(_) => Some(RejectCode::Io),
            _ => None,
        }
    }
}

impl From<WireError> for TransferError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => TransferError::Io(e),
            WireError::ConnectionClosed => TransferError::ConnectionClosed,
            WireError::Protocol(msg) => TransferError::Protocol(msg),
            WireError::InvalidName(msg) => TransferError::Protocol(format!("invalid name: {msg}")),
        }
    }
}

impl From<IdentityError> for TransferError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AuthenticationFailed(msg) => TransferError::Authentication(msg),
            IdentityError::Wire(e) => e.into(),
            IdentityError::Io(e) => TransferError::Io(e),
            other @ (IdentityError::InvalidKey { .. } | IdentityError::NoTrustedKeys) => {
                TransferError::Key(other.to_string())
            }
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Busy(key) => TransferError::Busy(key),
            other => TransferError::Ledger(other),
        }
    }
}
