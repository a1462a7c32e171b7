//! Receives files from trusted ferry senders.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ferry::config::ReceiverConfig;
use ferry_identity::TrustedKeys;
use ferry_transfer::Listener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Receive files from trusted ferry senders")]
struct Args {
    /// TCP port to listen on.
    #[arg(long)]
    listen: Option<u16>,

    /// Output directory. Created if missing.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Trusted sender public key (SPKI PEM). Repeat for several senders.
    #[arg(long = "trust")]
    trust: Vec<PathBuf>,

    /// Keep accepting connections after the first transfer.
    #[arg(long)]
    keep_listening: bool,

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
    let mut config = ReceiverConfig::load(args.config.as_deref())?;
    if args.listen.is_some() {
        config.listen_port = args.listen;
    }
    if args.out.is_some() {
        config.out_dir = args.out;
    }
    if !args.trust.is_empty() {
        config.trusted_keys = args.trust;
    }
    config.keep_listening |= args.keep_listening;

    let port = config
        .listen_port
        .context("no listen port: pass --listen or set listen_port in the config file")?;
    let out_dir = config
        .out_dir
        .clone()
        .context("no output directory: pass --out or set out_dir in the config file")?;
    let trusted = Arc::new(TrustedKeys::from_paths(&config.trusted_keys)?);
    tracing::info!(
        port,
        out_dir = %out_dir.display(),
        trusted = trusted.len(),
        keep_listening = config.keep_listening,
        "starting ferry receiver"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        ferry::cancel_on_ctrl_c(cancel.clone());

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(ferry::log_progress(rx));

        let listener = Listener::bind(
            ("0.0.0.0", port),
            &out_dir,
            trusted,
            config.listener_settings(),
            cancel,
        )
        .await?
        .with_progress(tx);

        if config.keep_listening {
            listener.serve().await?;
        } else {
            let file = listener.accept_one().await?;
            tracing::info!(
                path = %file.path.display(),
                size = file.identity.size,
                resumed_from = file.resumed_from,
                "file received"
            );
        }
        Ok::<(), anyhow::Error>(())
    })?;

    tracing::info!("receiver shut down cleanly");
    Ok(())
}
