//! Resumable, authenticated transfer of a single file over TCP.
//!
//! A [`Listener`] challenges each connection, then runs a receive session
//! that resumes from the offset recorded in its [`ResumeLedger`]. A
//! [`Sender`] answers the challenge and streams the file from that offset,
//! retrying failed attempts per its [`RetryPolicy`].
//!
//! [`ResumeLedger`]: ferry_ledger::ResumeLedger

use std::time::Duration;

pub mod client;
pub mod digest;
pub mod error;
pub mod progress;
pub mod retry;
pub mod server;
pub mod session;
pub mod sink;
pub mod source;

pub use client::{Sender, SenderSettings, TransferReport};
pub use digest::{SourceFile, file_digest};
pub use error::{FailureKind, TransferError};
pub use progress::TransferProgress;
pub use retry::RetryPolicy;
pub use server::{Listener, ListenerSettings};
pub use session::SessionState;
pub use session::receiver::{ReceivedFile, ReceiverContext, receive_file};
pub use session::sender::AttemptStats;

/// Time allowed for a TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the handshake.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest silence tolerated during a session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
