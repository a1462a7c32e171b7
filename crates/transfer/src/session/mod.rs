//! Per-connection transfer state machine.
//!
//! ```text
//! NEGOTIATING ──ResumeAt──▶ STREAMING ──last byte──▶ VERIFYING ──digest ok──▶ COMPLETE
//!      │                        │                        │
//!      └────────────────────────┴────────── error ───────┴──────────────────▶ FAILED
//! ```
//!
//! A resume offset equal to the file size skips STREAMING.

pub mod receiver;
pub mod sender;

use std::time::Duration;

use ferry_protocol::{Framer, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::TransferError;

/// Lifecycle of one transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Streaming,
    Verifying,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Negotiating, Streaming)
                | (Negotiating, Verifying)
                | (Streaming, Verifying)
                | (Verifying, Complete)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Streaming => "streaming",
            SessionState::Verifying => "verifying",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the current state of one side of a session.
#[derive(Debug)]
pub(crate) struct StateMachine {
    role: &'static str,
    state: SessionState,
}

impl StateMachine {
    pub(crate) fn new(role: &'static str) -> Self {
        Self {
            role,
            state: SessionState::Negotiating,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: SessionState) -> Result<(), TransferError> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::Protocol(format!(
                "illegal {} transition {} -> {next}",
                self.role, self.state
            )));
        }
        debug!(role = self.role, from = %self.state, to = %next, "session state");
        self.state = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, err: &TransferError) {
        if self.state.is_terminal() {
            return;
        }
        warn!(role = self.role, state = %self.state, error = %err, "session failed");
        self.state = SessionState::Failed;
    }
}

/// Reads the next message, failing if the peer stays silent for `idle`.
pub(crate) async fn recv<S>(
    framer: &mut Framer<S>,
    idle: Duration,
    waiting_for: &'static str,
) -> Result<Message, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(idle, framer.read_message()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransferError::Timeout(waiting_for)),
    }
}

/// Writes one message, failing if the peer stops draining for `idle`.
pub(crate) async fn send<S>(
    framer: &mut Framer<S>,
    msg: &Message,
    idle: Duration,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(idle, framer.write_message(msg)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransferError::Timeout("peer to accept data")),
    }
}
