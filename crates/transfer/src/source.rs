use std::path::Path;

use bytes::{Bytes, BytesMut};
use ferry_protocol::CHUNK_SIZE;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::TransferError;

/// Reads a source file in [`CHUNK_SIZE`] pieces starting at a resume offset.
///
/// Every chunk except the last is exactly `CHUNK_SIZE` bytes, so the
/// receiver's progress always lands on a chunk boundary.
pub struct ChunkSource {
    file: File,
    offset: u64,
    len: u64,
}

impl ChunkSource {
    /// Opens `path` for reading. The current on-disk length is captured here.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path).await.map_err(TransferError::Storage)?;
        let len = file.metadata().await.map_err(TransferError::Storage)?.len();
        Ok(Self {
            file,
            offset: 0,
            len,
        })
    }

    /// Positions the reader at `offset` (for resume).
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(TransferError::Storage)?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at end of file.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        let remaining = self.len.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(CHUNK_SIZE as u64) as usize;

        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;
        while filled < want {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(TransferError::Storage)?;
            if n == 0 {
                return Err(TransferError::Storage(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source shrank to {} bytes", self.offset + filled as u64),
                )));
            }
            filled += n;
        }

        self.offset += want as u64;
        Ok(Some(buf.freeze()))
    }

    /// Length of the file when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
