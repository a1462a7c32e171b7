//! Sender half of a session.

use std::time::Duration;

use ferry_protocol::{Framer, Message, RejectCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::{SessionState, StateMachine, recv, send};
use crate::TransferError;
use crate::digest::SourceFile;
use crate::progress::ProgressSink;
use crate::source::ChunkSource;

/// What one attempt achieved. Filled in as the attempt runs so a failed
/// attempt still reports the bytes it put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    /// Offset the receiver asked to resume from, once known.
    pub resumed_from: Option<u64>,
    /// File bytes written to the connection.
    pub bytes_sent: u64,
}

/// Offers `source` on an authenticated connection and streams it from the
/// receiver's resume offset.
pub(crate) async fn send_file<S>(
    framer: &mut Framer<S>,
    source: &SourceFile,
    restart: bool,
    idle: Duration,
    progress: &ProgressSink,
    stats: &mut AttemptStats,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut machine = StateMachine::new("sender");
    let result = run(framer, source, restart, idle, progress, stats, &mut machine).await;
    if let Err(err) = &result {
        machine.fail(err);
    }
    result
}

async fn run<S>(
    framer: &mut Framer<S>,
    source: &SourceFile,
    restart: bool,
    idle: Duration,
    progress: &ProgressSink,
    stats: &mut AttemptStats,
    machine: &mut StateMachine,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let identity = &source.identity;
    send(
        framer,
        &Message::FileOffer {
            identity: identity.clone(),
            restart,
        },
        idle,
    )
    .await?;

    let offset = match recv(framer, idle, "resume offset").await? {
        Message::ResumeAt { offset } => offset,
        Message::Rejected { code, reason } => {
            return Err(TransferError::Rejected { code, reason });
        }
        other => {
            return Err(TransferError::Protocol(format!(
                "expected ResumeAt, got {}",
                other.kind()
            )));
        }
    };

    let mut chunks = ChunkSource::open(&source.path).await?;
    if offset > chunks.len() {
        return Err(TransferError::ResumeConflict {
            offset,
            source_len: chunks.len(),
        });
    }
    if chunks.len() != identity.size {
        return Err(TransferError::Storage(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{} changed size since it was hashed ({} -> {})",
                source.path.display(),
                identity.size,
                chunks.len()
            ),
        )));
    }
    stats.resumed_from = Some(offset);
    if offset > 0 {
        info!(file = %identity, offset, "receiver resumes mid-file");
    }

    chunks.seek_to(offset).await?;
    machine.advance(if offset < identity.size {
        SessionState::Streaming
    } else {
        SessionState::Verifying
    })?;

    while let Some(data) = chunks.next_chunk().await? {
        let n = data.len() as u64;
        send(framer, &Message::Chunk { data }, idle).await?;
        stats.bytes_sent += n;
        progress.report(chunks.offset(), identity.size);
    }
    if machine.state() == SessionState::Streaming {
        machine.advance(SessionState::Verifying)?;
    }

    send(
        framer,
        &Message::Done {
            digest: source.digest,
        },
        idle,
    )
    .await?;
    debug!(file = %identity, "all data sent, awaiting verification");

    match recv(framer, idle, "acknowledgement").await? {
        Message::Ack => {
            machine.advance(SessionState::Complete)?;
            Ok(())
        }
        Message::Rejected {
            code: RejectCode::Integrity,
            reason,
        } => Err(TransferError::Integrity(reason)),
        Message::Rejected { code, reason } => Err(TransferError::Rejected { code, reason }),
        other => Err(TransferError::Protocol(format!(
            "expected Ack, got {}",
            other.kind()
        ))),
    }
}
