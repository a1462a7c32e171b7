//! Receiver half of a session.
//!
//! Runs after the handshake. The ledger is advanced only after the chunk it
//! covers has been synced, so a crash leaves the partial file at or ahead of
//! its record, never behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ferry_identity::Authenticated;
use ferry_ledger::{LedgerError, ResumeLedger};
use ferry_protocol::{CHUNK_SIZE, FileIdentity, Framer, Message, validate_file_name};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{SessionState, StateMachine, recv, send};
use crate::TransferError;
use crate::digest::file_digest;
use crate::progress::{ProgressSink, TransferProgress};
use crate::sink::{PartialFile, partial_len};

/// Shared state a receiver session runs against.
#[derive(Debug, Clone)]
pub struct ReceiverContext {
    pub ledger: Arc<ResumeLedger>,
    /// Directory finished files are moved into.
    pub out_dir: PathBuf,
    pub idle_timeout: Duration,
    pub progress: Option<mpsc::Sender<TransferProgress>>,
}

/// A file that reached COMPLETE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub identity: FileIdentity,
    pub path: PathBuf,
    /// Offset the session resumed from.
    pub resumed_from: u64,
}

/// Receives one file over an authenticated connection.
///
/// On failure the sender is told why with a `Rejected` message when the
/// stream is still usable.
pub async fn receive_file<S>(
    framer: &mut Framer<S>,
    peer: &Authenticated,
    ctx: &ReceiverContext,
) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut machine = StateMachine::new("receiver");
    match run(framer, peer, ctx, &mut machine).await {
        Ok(file) => Ok(file),
        Err(err) => {
            machine.fail(&err);
            if let Some(code) = err.reject_code() {
                let reject = Message::Rejected {
                    code,
                    reason: err.to_string(),
                };
                if let Err(e) = send(framer, &reject, ctx.idle_timeout).await {
                    debug!(error = %e, "could not deliver rejection");
                }
            }
            Err(err)
        }
    }
}

async fn run<S>(
    framer: &mut Framer<S>,
    peer: &Authenticated,
    ctx: &ReceiverContext,
    machine: &mut StateMachine,
) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = ctx.idle_timeout;
    let (identity, restart) = match recv(framer, idle, "file offer").await? {
        Message::FileOffer { identity, restart } => (identity, restart),
        other => {
            return Err(TransferError::Protocol(format!(
                "expected FileOffer, got {}",
                other.kind()
            )));
        }
    };
    validate_file_name(&identity.name)?;
    info!(sender = %peer.fingerprint(), file = %identity, restart, "offer received");

    let ledger = &ctx.ledger;
    let _claim = ledger.claim(&identity)?;
    let id = identity.clone();
    with_ledger(ledger, move |l| l.abandon_stale(&id)).await?;

    let partial_path = ledger.partial_path(&identity);
    let on_disk = partial_len(&partial_path).await?;
    let id = identity.clone();
    let offset = match with_ledger(ledger, move |l| l.lookup(&id)).await? {
        Some(record) if !restart && record.is_resumable() && on_disk >= record.bytes_received => {
            record.bytes_received
        }
        Some(record) => {
            if !restart {
                warn!(
                    file = %identity,
                    recorded = record.bytes_received,
                    on_disk,
                    corrupt = record.corrupt,
                    "record not resumable, starting over"
                );
            }
            let id = identity.clone();
            with_ledger(ledger, move |l| l.restart(&id)).await?;
            0
        }
        None => {
            let id = identity.clone();
            with_ledger(ledger, move |l| l.begin(&id)).await?;
            0
        }
    };

    let mut sink = PartialFile::open(&partial_path, offset).await?;
    send(framer, &Message::ResumeAt { offset }, idle).await?;
    if offset > 0 {
        info!(file = %identity, offset, "resuming transfer");
    }

    let size = identity.size;
    machine.advance(if offset < size {
        SessionState::Streaming
    } else {
        SessionState::Verifying
    })?;

    let progress = ProgressSink::new(ctx.progress.clone());
    let mut received = offset;
    let claimed_digest = loop {
        match recv(framer, idle, "chunk").await? {
            Message::Chunk { data } => {
                check_chunk(&identity, received, data.len())?;
                received = sink.append(&data).await?;
                let id = identity.clone();
                with_ledger(ledger, move |l| l.advance(&id, received)).await?;
                progress.report(received, size);
                if received == size {
                    machine.advance(SessionState::Verifying)?;
                }
            }
            Message::Done { digest } => break digest,
            other => {
                return Err(TransferError::Protocol(format!(
                    "unexpected {} while {}",
                    other.kind(),
                    machine.state()
                )));
            }
        }
    };

    if received != size {
        return Err(TransferError::Protocol(format!(
            "Done after {received} of {size} bytes"
        )));
    }

    let actual = file_digest(sink.path()).await?;
    if actual != claimed_digest {
        let id = identity.clone();
        with_ledger(ledger, move |l| l.mark_corrupt(&id)).await?;
        return Err(TransferError::Integrity(format!(
            "{} digest {} does not match sender's {}",
            identity.name,
            hex::encode(actual),
            hex::encode(claimed_digest)
        )));
    }

    let dest = ctx.out_dir.join(&identity.name);
    sink.finalize(&dest).await?;
    let id = identity.clone();
    with_ledger(ledger, move |l| l.complete(&id)).await?;
    send(framer, &Message::Ack, idle).await?;
    machine.advance(SessionState::Complete)?;

    info!(
        file = %identity,
        path = %dest.display(),
        resumed_from = offset,
        "transfer complete"
    );
    Ok(ReceivedFile {
        identity,
        path: dest,
        resumed_from: offset,
    })
}

/// Runs a ledger call on the blocking pool. Every update fsyncs, which must
/// not stall other sessions sharing the runtime.
async fn with_ledger<T, F>(ledger: &Arc<ResumeLedger>, f: F) -> Result<T, TransferError>
where
    F: FnOnce(&ResumeLedger) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| TransferError::Storage(std::io::Error::other(e)))?
        .map_err(TransferError::from)
}

/// Chunks must be full-sized except the one that ends the file.
fn check_chunk(identity: &FileIdentity, received: u64, len: usize) -> Result<(), TransferError> {
    if len == 0 {
        return Err(TransferError::Protocol("empty chunk".into()));
    }
    if len > CHUNK_SIZE {
        return Err(TransferError::Protocol(format!(
            "chunk of {len} bytes exceeds {CHUNK_SIZE}"
        )));
    }
    let end = received + len as u64;
    if end > identity.size {
        return Err(TransferError::Protocol(format!(
            "chunk overruns file: {end} > {}",
            identity.size
        )));
    }
    if len < CHUNK_SIZE && end != identity.size {
        return Err(TransferError::Protocol(format!(
            "short chunk of {len} bytes at offset {received}"
        )));
    }
    Ok(())
}
