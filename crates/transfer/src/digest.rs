//! SHA-256 helpers for whole files and file identities.
//!
//! Hashing runs on the blocking pool so multi-gigabyte files do not stall
//! the runtime.

use std::io::Read;
use std::path::{Path, PathBuf};

use ferry_protocol::{Digest, FileIdentity, HEAD_BLOCK_SIZE, validate_file_name};
use sha2::{Digest as _, Sha256};

use crate::TransferError;

const READ_BUF_SIZE: usize = 64 * 1024;

/// A local file prepared for sending.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub identity: FileIdentity,
    /// SHA-256 of the whole file, sent in `Done`.
    pub digest: Digest,
}

impl SourceFile {
    /// Hashes `path` and derives its transfer identity.
    ///
    /// The identity name is the final path component.
    pub async fn prepare(path: &Path) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::Storage(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no UTF-8 file name", path.display()),
                ))
            })?
            .to_string();
        validate_file_name(&name).map_err(|e| {
            TransferError::Storage(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                e.to_string(),
            ))
        })?;

        let owned = path.to_path_buf();
        let (size, head, digest) = blocking(move || hash_with_head(&owned)).await?;

        Ok(Self {
            path: path.to_path_buf(),
            identity: FileIdentity::new(name, size, head),
            digest,
        })
    }
}

/// SHA-256 of the whole file at `path`.
pub async fn file_digest(path: &Path) -> Result<Digest, TransferError> {
    let owned = path.to_path_buf();
    let (_, _, digest) = blocking(move || hash_with_head(&owned)).await?;
    Ok(digest)
}

/// SHA-256 of the first [`HEAD_BLOCK_SIZE`] bytes of `data`.
pub fn head_digest(data: &[u8]) -> Digest {
    let end = data.len().min(HEAD_BLOCK_SIZE);
    Sha256::digest(&data[..end]).into()
}

/// Reads the file once, returning its length, head digest and full digest.
fn hash_with_head(path: &Path) -> std::io::Result<(u64, Digest, Digest)> {
    let mut file = std::fs::File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }

    let mut full = Sha256::new();
    let mut head = Sha256::new();
    let mut head_left = HEAD_BLOCK_SIZE;
    let mut size = 0u64;
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let data = &buf[..n];
        full.update(data);
        if head_left > 0 {
            let take = head_left.min(n);
            head.update(&data[..take]);
            head_left -= take;
        }
        size += n as u64;
    }
    Ok((size, head.finalize().into(), full.finalize().into()))
}

async fn blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Storage(std::io::Error::other(e)))?
        .map_err(TransferError::Storage)
}
