//! Crash-safe file replacement.
//!
//! Content goes to `<path>.tmp`, is fsynced, then renamed over `path`; the
//! parent directory is fsynced so the rename itself survives power loss.
//! Readers only ever see the old or the new content.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::error;

/// Extension appended to in-flight temp files.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(TMP_SUFFIX);
    PathBuf::from(s)
}

/// Atomically replaces `path` with `content`.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);

    let written = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(content)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        error!(path = %tmp.display(), error = %e, "failed to write temp file");
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        error!(
            from = %tmp.display(),
            to = %path.display(),
            error = %e,
            "failed to rename temp file"
        );
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Fsyncs a directory so entries created or renamed in it are durable.
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.json");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn no_temp_file_remains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.json");
        atomic_write(&path, b"data").unwrap();
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn failed_write_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.json");
        atomic_write(&path, b"original").unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(tmp_path(&path)).unwrap();
        assert!(atomic_write(&path, b"replacement").is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }
}
