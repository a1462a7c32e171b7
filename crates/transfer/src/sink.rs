//! Receiver-side partial file.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, info};

use crate::TransferError;

/// Append-only writer for the partial data of one transfer.
///
/// Every append is synced before it returns; the caller may then record
/// the new length in the ledger.
pub struct PartialFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl PartialFile {
    /// Opens (creating if needed) the partial file and cuts it to `offset`.
    ///
    /// Bytes past `offset` were written but never recorded, so they are
    /// discarded.
    pub async fn open(path: &Path, offset: u64) -> Result<Self, TransferError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(TransferError::Storage)?;

        let on_disk = file.metadata().await.map_err(TransferError::Storage)?.len();
        if on_disk < offset {
            return Err(TransferError::Storage(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "partial file {} holds {on_disk} bytes, expected at least {offset}",
                    path.display()
                ),
            )));
        }
        if on_disk != offset {
            debug!(path = %path.display(), on_disk, offset, "truncating unrecorded tail");
            file.set_len(offset).await.map_err(TransferError::Storage)?;
        }
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(TransferError::Storage)?;
        file.sync_all().await.map_err(TransferError::Storage)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: offset,
        })
    }

    /// Appends `data` and waits until it is durable.
    pub async fn append(&mut self, data: &[u8]) -> Result<u64, TransferError> {
        self.file
            .write_all(data)
            .await
            .map_err(TransferError::Storage)?;
        self.file.flush().await.map_err(TransferError::Storage)?;
        self.file.sync_data().await.map_err(TransferError::Storage)?;
        self.len += data.len() as u64;
        Ok(self.len)
    }

    /// Bytes currently in the partial file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the finished file to `dest` and makes the rename durable.
    ///
    /// Replaces any existing file at `dest`.
    pub async fn finalize(mut self, dest: &Path) -> Result<(), TransferError> {
        self.file.flush().await.map_err(TransferError::Storage)?;
        self.file.sync_all().await.map_err(TransferError::Storage)?;
        drop(self.file);

        tokio::fs::rename(&self.path, dest)
            .await
            .map_err(TransferError::Storage)?;
        if let Some(parent) = dest.parent() {
            sync_dir(parent).await?;
        }
        info!(path = %dest.display(), bytes = self.len, "file finalized");
        Ok(())
    }
}

/// Size of an existing partial file, or zero when there is none.
pub async fn partial_len(path: &Path) -> Result<u64, TransferError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(TransferError::Storage(e)),
    }
}

async fn sync_dir(dir: &Path) -> Result<(), TransferError> {
    #[cfg(unix)]
    {
        File::open(dir)
            .await
            .map_err(TransferError::Storage)?
            .sync_all()
            .await
            .map_err(TransferError::Storage)?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
