//! Stable identity of a transferred file.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::WireError;
use crate::{Digest, MAX_NAME_LEN};

/// Domain separator mixed into every identity key.
const IDENTITY_CONTEXT: &[u8] = b"ferry-identity-v1";

/// Identifies one file across transfer attempts.
///
/// Two offers only resume each other when name, size and the digest of
/// the leading block all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Base name of the source file.
    pub name: String,
    /// Total file size in bytes.
    pub size: u64,
    /// SHA-256 of the first [`HEAD_BLOCK_SIZE`](crate::HEAD_BLOCK_SIZE) bytes.
    #[serde(with = "hex::serde")]
    pub head_digest: Digest,
}

impl FileIdentity {
    pub fn new(name: impl Into<String>, size: u64, head_digest: Digest) -> Self {
        Self {
            name: name.into(),
            size,
            head_digest,
        }
    }

    /// Returns the 32-character hex key used to name ledger records.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(IDENTITY_CONTEXT);
        hasher.update((self.name.len() as u16).to_be_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(self.size.to_be_bytes());
        hasher.update(self.head_digest);
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes, {})", self.name, self.size, self.key())
    }
}

/// Validates a file name received from the peer.
///
/// Only plain base names are accepted: no separators, no drive prefixes,
/// no `.`/`..`, no control characters.
pub fn validate_file_name(name: &str) -> Result<(), WireError> {
    if name.is_empty() {
        return Err(WireError::InvalidName("empty name".into()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(WireError::InvalidName(format!(
            "name too long: {} bytes (max {MAX_NAME_LEN})",
            name.len()
        )));
    }

    if name == "." || name == ".." {
        return Err(WireError::InvalidName(format!("reserved name: {name}")));
    }

    if name.contains(['/', '\\']) {
        return Err(WireError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    // Reject Windows-style drive prefixes.
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(WireError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(WireError::InvalidName(
            "control characters not allowed".into(),
        ));
    }

    Ok(())
}
