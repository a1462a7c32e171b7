//! Generates an Ed25519 key pair for ferry senders.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ferry_identity::keys::{keypair_paths, write_keypair};
use ferry_identity::{fingerprint, generate_signing_key};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Generate a sender key pair",
    long_about = "Writes <PREFIX>.pem (PKCS#8 private key) and <PREFIX>.pub.pem (SPKI public key). \
                  Give the public key to receivers with --trust."
)]
struct Args {
    /// Output path prefix.
    prefix: PathBuf,

    /// Overwrite existing key files.
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    ferry::init_logging();
    let args = Args::parse();
    ferry::report(run(args))
}

fn run(args: Args) -> anyhow::Result<()> {
    if !args.force {
        let (private_path, public_path) = keypair_paths(&args.prefix);
        for path in [private_path, public_path] {
            if path.exists() {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
        }
    }

    let key = generate_signing_key();
    let (private_path, public_path) = write_keypair(&key, &args.prefix)?;
    tracing::info!(
        private = %private_path.display(),
        public = %public_path.display(),
        fingerprint = %fingerprint(&key.verifying_key()),
        "key pair written"
    );
    Ok(())
}
