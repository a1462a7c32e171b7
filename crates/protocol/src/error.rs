//! Error types for the wire protocol.

/// Errors produced while framing or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer shut down its write side on a frame boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

impl WireError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
