//! TCP listener (receiver side).
//!
//! Accepts a connection, authenticates the sender, and runs one receive
//! session on it. Connections are handled one at a time.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_identity::{TrustedKeys, challenge_peer};
use ferry_ledger::ResumeLedger;
use ferry_protocol::Framer;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::TransferProgress;
use crate::session::receiver::{ReceivedFile, ReceiverContext, receive_file};
use crate::{DEFAULT_AUTH_TIMEOUT, DEFAULT_IDLE_TIMEOUT, TransferError};

/// Receiver-side timeouts.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Time allowed for the handshake to finish.
    pub auth_timeout: Duration,
    /// Longest silence tolerated once the session is running.
    pub idle_timeout: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Receives files from trusted senders into one output directory.
///
/// All state is owned by the value, so several listeners can run in one
/// process. Listeners that share a ledger must share the same
/// `Arc<ResumeLedger>` for claims to exclude each other.
pub struct Listener {
    listener: TcpListener,
    trusted: Arc<TrustedKeys>,
    ctx: ReceiverContext,
    auth_timeout: Duration,
    cancel: CancellationToken,
}

impl Listener {
    /// Binds `addr` and opens the ledger under `out_dir`, creating the
    /// directory if needed.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        out_dir: &Path,
        trusted: Arc<TrustedKeys>,
        settings: ListenerSettings,
        cancel: CancellationToken,
    ) -> Result<Self, TransferError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(TransferError::Storage)?;
        let ledger = Arc::new(ResumeLedger::open(out_dir)?);
        let listener = TcpListener::bind(addr).await?;

        info!(
            addr = %listener.local_addr()?,
            out_dir = %out_dir.display(),
            trusted = trusted.len(),
            "listener bound"
        );
        Ok(Self::new(
            listener,
            ledger,
            out_dir.to_path_buf(),
            trusted,
            settings,
            cancel,
        ))
    }

    /// Builds a listener from already-open parts.
    pub fn new(
        listener: TcpListener,
        ledger: Arc<ResumeLedger>,
        out_dir: PathBuf,
        trusted: Arc<TrustedKeys>,
        settings: ListenerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            listener,
            trusted,
            ctx: ReceiverContext {
                ledger,
                out_dir,
                idle_timeout: settings.idle_timeout,
                progress: None,
            },
            auth_timeout: settings.auth_timeout,
            cancel,
        }
    }

    /// Streams receive progress to `tx`. Updates are dropped if it lags.
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.ctx.progress = Some(tx);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn ledger(&self) -> &Arc<ResumeLedger> {
        &self.ctx.ledger
    }

    /// Accepts one connection and runs its session to the end.
    pub async fn accept_one(&self) -> Result<ReceivedFile, TransferError> {
        let (stream, addr) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(TransferError::Cancelled);
            }
            result = self.listener.accept() => result?,
        };
        info!(%addr, "connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not set TCP_NODELAY");
        }
        self.handle_connection(stream).await
    }

    /// Accepts connections until cancelled. Failed sessions are logged and
    /// do not stop the loop.
    pub async fn serve(&self) -> Result<(), TransferError> {
        loop {
            match self.accept_one().await {
                Ok(file) => {
                    debug!(path = %file.path.display(), "session finished");
                }
                Err(TransferError::Cancelled) => {
                    info!("listener stopped");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "session failed");
                }
            }
        }
    }

    /// Authenticates the peer on `stream` and receives one file.
    pub async fn handle_connection<S>(&self, stream: S) -> Result<ReceivedFile, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framer = Framer::new(stream);
        let session = async {
            let peer = match tokio::time::timeout(
                self.auth_timeout,
                challenge_peer(&mut framer, &self.trusted),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!("handshake timed out");
                    return Err(TransferError::Timeout("handshake"));
                }
            };
            let file = receive_file(&mut framer, &peer, &self.ctx).await?;
            if let Err(e) = framer.close().await {
                debug!(error = %e, "close after Ack failed");
            }
            Ok::<_, TransferError>(file)
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = session => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use ferry_identity::generate_signing_key;
    use ferry_protocol::{Framer, Message};

    use super::*;

    async fn bind(out_dir: &Path, settings: ListenerSettings, cancel: CancellationToken) -> Listener {
        let key = generate_signing_key();
        let trusted = Arc::new(TrustedKeys::new([key.verifying_key()]).unwrap());
        Listener::bind("127.0.0.1:0", out_dir, trusted, settings, cancel)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bind_creates_output_and_state_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out");
        let _l = bind(&out, ListenerSettings::default(), CancellationToken::new()).await;
        assert!(out.join(".ferry/ledger").is_dir());
        assert!(out.join(".ferry/partial").is_dir());
    }

    #[tokio::test]
    async fn listeners_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let a = bind(&dir.path().join("a"), ListenerSettings::default(), CancellationToken::new()).await;
        let b = bind(&dir.path().join("b"), ListenerSettings::default(), CancellationToken::new()).await;
        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[tokio::test]
    async fn silent_peer_times_out_in_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ListenerSettings {
            auth_timeout: Duration::from_millis(100),
            ..ListenerSettings::default()
        };
        let listener = bind(dir.path(), settings, CancellationToken::new()).await;
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { listener.accept_one().await });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut framer = Framer::new(stream);
        assert!(matches!(
            framer.read_message().await.unwrap(),
            Message::Challenge { .. }
        ));

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Timeout("handshake")), "{err}");
    }

    #[tokio::test]
    async fn cancel_stops_accept() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let listener = bind(dir.path(), ListenerSettings::default(), cancel.clone()).await;
        let server = tokio::spawn(async move { listener.accept_one().await });

        cancel.cancel();
        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn serve_returns_ok_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let listener = bind(dir.path(), ListenerSettings::default(), cancel.clone()).await;
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { listener.serve().await });

        // A failed session does not end the loop.
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_finished());

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn offer_before_response_gets_no_resume_offset() {
        let dir = tempfile::tempdir().unwrap();
        let listener = bind(dir.path(), ListenerSettings::default(), CancellationToken::new()).await;
        let addr = listener.local_addr().unwrap();
        let ledger = listener.ledger().clone();
        let server = tokio::spawn(async move { listener.accept_one().await });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut framer = Framer::new(stream);
        framer.read_message().await.unwrap();
        framer
            .write_message(&Message::FileOffer {
                identity: ferry_protocol::FileIdentity::new("sneaky.bin", 10, [0; 32]),
                restart: false,
            })
            .await
            .unwrap();
        assert_eq!(framer.read_message().await.unwrap(), Message::AuthFailed);

        assert!(server.await.unwrap().is_err());
        assert!(ledger.records().unwrap().is_empty());
    }
}
