//! Shared plumbing for the ferry command-line tools.

pub mod config;

use std::process::ExitCode;

use ferry_transfer::{FailureKind, TransferError, TransferProgress};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Installs the `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Maps a top-level error to the process exit code.
///
/// Transfer failures carry their own class; key and configuration problems
/// count as local I/O.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<TransferError>()
        .map_or(FailureKind::LocalIo, TransferError::kind)
        .exit_code()
}

/// Logs the error chain and converts it to an [`ExitCode`].
pub fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Cancels `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            token.cancel();
        }
    });
}

/// Logs progress at every 10% step until the channel closes.
pub async fn log_progress(mut rx: mpsc::Receiver<TransferProgress>) {
    let mut last_step = None;
    while let Some(p) = rx.recv().await {
        let step = (p.percentage() / 10.0).floor() as u32;
        if last_step != Some(step) {
            last_step = Some(step);
            tracing::info!(
                transferred = p.transferred,
                total = p.total,
                percent = step * 10,
                "progress"
            );
        }
    }
}
