//! Sends one file to a ferry receiver.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ferry::config::SenderConfig;
use ferry_identity::{fingerprint, keys::load_signing_key};
use ferry_transfer::Sender;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Send a file to a ferry receiver")]
struct Args {
    /// Receiver host name or address.
    host: String,

    /// Receiver TCP port.
    port: u16,

    /// File to send.
    file: PathBuf,

    /// Private key (PKCS#8 PEM) to authenticate with.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Retries after a failed attempt. Each retry resumes where the
    /// receiver left off.
    #[arg(long)]
    retries: Option<u32>,

    /// Path to a config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    ferry::init_logging();
    let args = Args::parse();
    ferry::report(run(args))
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = SenderConfig::load(args.config.as_deref())?;
    if let Some(retries) = args.retries {
        config.max_attempts = retries.saturating_add(1);
    }

    let key_path = args
        .key
        .or_else(|| config.key_path.clone())
        .context("no signing key: pass --key or set key_path in the config file")?;
    let key = load_signing_key(&key_path)?;
    tracing::info!(
        key = %fingerprint(&key.verifying_key()),
        file = %args.file.display(),
        "starting ferry sender"
    );

    let addr = if args.host.contains(':') && !args.host.starts_with('[') {
        format!("[{}]:{}", args.host, args.port)
    } else {
        format!("{}:{}", args.host, args.port)
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        ferry::cancel_on_ctrl_c(cancel.clone());

        let (tx, rx) = mpsc::channel(64);
        let progress = tokio::spawn(ferry::log_progress(rx));

        let sender = Sender::new(key, config.sender_settings(), cancel).with_progress(tx);
        let result = sender.send_path(&addr, &args.file).await;
        drop(sender);
        let _ = progress.await;
        result
    })?;

    tracing::info!(
        addr = %addr,
        size = report.size,
        resumed_from = report.resumed_from,
        bytes_sent = report.bytes_sent,
        attempts = report.attempts,
        sha256 = %hex::encode(report.digest),
        "transfer complete"
    );
    Ok(())
}
