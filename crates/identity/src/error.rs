//! Error types for identity material and the handshake.

use std::path::PathBuf;

use ferry_protocol::WireError;

/// Errors produced while loading keys or authenticating a peer.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key in {path}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },

    #[error("no trusted public keys configured")]
    NoTrustedKeys,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}
