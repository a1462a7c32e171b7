//! Sender driver.
//!
//! Connects to a receiver, answers its challenge, and drives one send
//! session per attempt. Retryable failures are retried with backoff; each
//! new attempt resumes wherever the receiver's ledger left off.

use std::path::Path;
use std::time::Duration;

use ferry_identity::{SigningKey, answer_challenge};
use ferry_protocol::{Digest, Framer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::digest::SourceFile;
use crate::progress::{ProgressSink, TransferProgress};
use crate::retry::RetryPolicy;
use crate::session::sender::{AttemptStats, send_file};
use crate::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, TransferError};

/// Sender-side timeouts and retry policy.
#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub connect_timeout: Duration,
    /// Longest silence tolerated from the receiver, handshake included.
    pub idle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub size: u64,
    pub digest: Digest,
    /// Offset the successful attempt resumed from.
    pub resumed_from: u64,
    /// File bytes put on the wire across all attempts.
    pub bytes_sent: u64,
    pub attempts: u32,
}

/// Sends files to a receiver as one authenticated identity.
pub struct Sender {
    key: SigningKey,
    settings: SenderSettings,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl Sender {
    pub fn new(key: SigningKey, settings: SenderSettings, cancel: CancellationToken) -> Self {
        Self {
            key,
            settings,
            cancel,
            progress: ProgressSink::default(),
        }
    }

    /// Streams send progress to `tx`. Updates are dropped if it lags.
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = ProgressSink::new(Some(tx));
        self
    }

    /// Hashes `path` and sends it to `addr` (`host:port`).
    pub async fn send_path(&self, addr: &str, path: &Path) -> Result<TransferReport, TransferError> {
        let source = SourceFile::prepare(path).await?;
        info!(
            file = %source.identity,
            digest = %hex::encode(source.digest),
            "source prepared"
        );
        self.send(addr, &source).await
    }

    /// Sends an already prepared source, retrying per the retry policy.
    pub async fn send(
        &self,
        addr: &str,
        source: &SourceFile,
    ) -> Result<TransferReport, TransferError> {
        let policy = &self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut failures = 0u32;
        let mut bytes_sent = 0u64;
        let mut restart = false;
        let mut restarted = false;

        loop {
            attempts += 1;
            let mut stats = AttemptStats::default();
            let result = self.attempt(addr, source, restart, &mut stats).await;
            bytes_sent += stats.bytes_sent;
            if stats.resumed_from.is_some() {
                restart = false;
            }

            match result {
                Ok(()) => {
                    let report = TransferReport {
                        size: source.identity.size,
                        digest: source.digest,
                        resumed_from: stats.resumed_from.unwrap_or(0),
                        bytes_sent,
                        attempts,
                    };
                    info!(
                        file = %source.identity,
                        resumed_from = report.resumed_from,
                        bytes_sent,
                        attempts,
                        "transfer acknowledged"
                    );
                    return Ok(report);
                }
                Err(TransferError::ResumeConflict { offset, source_len }) if !restarted => {
                    warn!(offset, source_len, "receiver is ahead of the source, restarting");
                    restart = true;
                    restarted = true;
                }
                Err(e) if e.is_retryable() && failures + 1 < max_attempts => {
                    failures += 1;
                    let delay = policy.delay_for_attempt(failures);
                    warn!(
                        attempt = attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs a single attempt over a fresh TCP connection.
    pub async fn attempt(
        &self,
        addr: &str,
        source: &SourceFile,
        restart: bool,
        stats: &mut AttemptStats,
    ) -> Result<(), TransferError> {
        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(TransferError::Timeout("connection")),
                }
            }
        };
        stream.set_nodelay(true)?;
        debug!(addr, "connected to receiver");
        self.attempt_over(stream, source, restart, stats).await
    }

    /// Runs a single attempt over an established stream.
    pub async fn attempt_over<S>(
        &self,
        stream: S,
        source: &SourceFile,
        restart: bool,
        stats: &mut AttemptStats,
    ) -> Result<(), TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.settings.idle_timeout;
        let mut framer = Framer::new(stream);
        let session = async {
            match tokio::time::timeout(idle, answer_challenge(&mut framer, &self.key)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransferError::Timeout("challenge")),
            }
            send_file(&mut framer, source, restart, idle, &self.progress, stats).await?;
            if let Err(e) = framer.close().await {
                debug!(error = %e, "close after Ack failed");
            }
            Ok::<(), TransferError>(())
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
    use std::path::PathBuf;
    use std::sync::Arc;

    use ferry_identity::{TrustedKeys, generate_signing_key};
    use ferry_ledger::ResumeLedger;
    use ferry_protocol::CHUNK_SIZE;
    use rand::RngCore;
    use sha2::{Digest as _, Sha256};

    use super::*;
    use crate::server::{Listener, ListenerSettings};

    struct Fixture {
        _dir: tempfile::TempDir,
        src_dir: PathBuf,
        out_dir: PathBuf,
        key: SigningKey,
        trusted: Arc<TrustedKeys>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&src_dir).unwrap();
        let key = generate_signing_key();
        let trusted = Arc::new(TrustedKeys::new([key.verifying_key()]).unwrap());
        Fixture {
            _dir: dir,
            src_dir,
            out_dir,
            key,
            trusted,
        }
    }

    fn random_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn sha256_file(path: &Path) -> [u8; 32] {
        Sha256::digest(std::fs::read(path).unwrap()).into()
    }

    async fn listener(fx: &Fixture) -> Listener {
        Listener::bind(
            "127.0.0.1:0",
            &fx.out_dir,
            fx.trusted.clone(),
            ListenerSettings::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    fn sender(key: SigningKey) -> Sender {
        Sender::new(key, SenderSettings::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn full_transfer_of_random_file() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "payload.bin", 5 * 1024 * 1024);

        let listener = listener(&fx).await;
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move { listener.accept_one().await });

        let report = sender(fx.key.clone()).send_path(&addr, &src).await.unwrap();
        let received = server.await.unwrap().unwrap();

        assert_eq!(received.path, fx.out_dir.join("payload.bin"));
        assert_eq!(sha256_file(&received.path), sha256_file(&src));
        assert_eq!(report.digest, sha256_file(&src));
        assert_eq!(report.resumed_from, 0);
        assert_eq!(report.bytes_sent, 5 * 1024 * 1024);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn boundary_sizes_round_trip() {
        for len in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let fx = fixture();
            let src = random_file(&fx.src_dir, "edge.bin", len);

            let listener = listener(&fx).await;
            let addr = listener.local_addr().unwrap().to_string();
            let server = tokio::spawn(async move { listener.accept_one().await });

            let report = sender(fx.key.clone()).send_path(&addr, &src).await.unwrap();
            let received = server.await.unwrap().unwrap();

            assert_eq!(report.size, len as u64, "len {len}");
            assert_eq!(std::fs::read(&received.path).unwrap(), std::fs::read(&src).unwrap());
        }
    }

    #[tokio::test]
    async fn completed_transfer_clears_ledger() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "done.bin", 1000);

        let listener = listener(&fx).await;
        let addr = listener.local_addr().unwrap().to_string();
        let ledger = listener.ledger().clone();
        let server = tokio::spawn(async move { listener.accept_one().await });

        sender(fx.key.clone()).send_path(&addr, &src).await.unwrap();
        server.await.unwrap().unwrap();

        assert!(ledger.records().unwrap().is_empty());
        let partials = std::fs::read_dir(fx.out_dir.join(".ferry/partial")).unwrap();
        assert_eq!(partials.count(), 0);
    }

    #[tokio::test]
    async fn untrusted_key_is_rejected_before_offer() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "secret.bin", 10_000);

        let listener = listener(&fx).await;
        let addr = listener.local_addr().unwrap().to_string();
        let ledger = listener.ledger().clone();
        let server = tokio::spawn(async move { listener.accept_one().await });

        let err = sender(generate_signing_key())
            .send_path(&addr, &src)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Authentication(_)), "{err}");
        assert_eq!(err.kind().exit_code(), 2);

        let server_err = server.await.unwrap().unwrap_err();
        assert!(matches!(server_err, TransferError::Authentication(_)));

        assert!(ledger.records().unwrap().is_empty());
        let partials = std::fs::read_dir(fx.out_dir.join(".ferry/partial")).unwrap();
        assert_eq!(partials.count(), 0);
        assert!(!fx.out_dir.join("secret.bin").exists());
    }

    #[tokio::test]
    async fn corrupted_data_fails_integrity_then_restarts() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "image.bin", 3 * CHUNK_SIZE + 77);
        let honest = SourceFile::prepare(&src).await.unwrap();

        // Same identity and digest, but the last chunk on disk is altered.
        let mut bytes = std::fs::read(&src).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered_path = fx.src_dir.join("tampered.bin");
        std::fs::write(&tampered_path, &bytes).unwrap();
        let tampered = SourceFile {
            path: tampered_path,
            ..honest.clone()
        };

        let listener = listener(&fx).await;
        let addr = listener.local_addr().unwrap().to_string();
        let ledger = listener.ledger().clone();
        let listener = Arc::new(listener);

        let l = listener.clone();
        let server = tokio::spawn(async move { l.accept_one().await });
        let err = sender(fx.key.clone())
            .send(&addr, &tampered)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Integrity(_)), "{err}");
        assert_eq!(err.kind().exit_code(), 4);
        let server_err = server.await.unwrap().unwrap_err();
        assert!(matches!(server_err, TransferError::Integrity(_)));

        let record = ledger.lookup(&honest.identity).unwrap().unwrap();
        assert!(record.corrupt);
        assert!(!fx.out_dir.join("image.bin").exists());

        let l = listener.clone();
        let server = tokio::spawn(async move { l.accept_one().await });
        let report = sender(fx.key.clone()).send(&addr, &honest).await.unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(report.resumed_from, 0);
        assert_eq!(sha256_file(&fx.out_dir.join("image.bin")), honest.digest);
    }

    #[tokio::test]
    async fn connection_refused_exhausts_retries() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "x.bin", 10);

        // Grab a free port, then close it.
        let port = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let settings = SenderSettings {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                backoff_factor: 2.0,
            },
            ..SenderSettings::default()
        };
        let sender = Sender::new(fx.key.clone(), settings, CancellationToken::new());
        let err = sender
            .send_path(&format!("127.0.0.1:{port}"), &src)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)), "{err}");
        assert_eq!(err.kind().exit_code(), 1);
    }

    #[tokio::test]
    async fn cancelled_sender_stops() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "x.bin", 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let sender = Sender::new(fx.key.clone(), SenderSettings::default(), cancel);
        let err = sender.send_path("127.0.0.1:9", &src).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "p.bin", 2 * CHUNK_SIZE + 5);

        let listener = listener(&fx).await;
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move { listener.accept_one().await });

        let (tx, mut rx) = mpsc::channel(64);
        sender(fx.key.clone())
            .with_progress(tx)
            .send_path(&addr, &src)
            .await
            .unwrap();
        server.await.unwrap().unwrap();

        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p);
        }
        let last = last.unwrap();
        assert_eq!(last.transferred, last.total);
        assert_eq!(last.total, 2 * CHUNK_SIZE as u64 + 5);
    }

    #[tokio::test]
    async fn ledger_survives_listener_restart() {
        let fx = fixture();
        let src = random_file(&fx.src_dir, "again.bin", 100);

        for _ in 0..2 {
            let listener = listener(&fx).await;
            let addr = listener.local_addr().unwrap().to_string();
            let server = tokio::spawn(async move { listener.accept_one().await });
            sender(fx.key.clone()).send_path(&addr, &src).await.unwrap();
            server.await.unwrap().unwrap();
        }
        let ledger = ResumeLedger::open(&fx.out_dir).unwrap();
        assert!(ledger.records().unwrap().is_empty());
    }
}
