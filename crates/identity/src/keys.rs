//! Ed25519 key material.
//!
//! Private keys are PKCS#8 PEM, public keys are SPKI PEM. Both are the
//! formats `openssl genpkey -algorithm ed25519` produces.

use std::io::Write;
use std::path::{Path, PathBuf};

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::IdentityError;

/// Generates a new signing key from the OS random source.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Loads a PKCS#8 PEM private key.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, IdentityError> {
    let pem = std::fs::read_to_string(path)?;
    let key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| IdentityError::InvalidKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), fingerprint = %fingerprint(&key.verifying_key()), "signing key loaded");
    Ok(key)
}

/// Loads an SPKI PEM public key.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, IdentityError> {
    let pem = std::fs::read_to_string(path)?;
    VerifyingKey::from_public_key_pem(&pem).map_err(|e| IdentityError::InvalidKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes `<prefix>.pem` (private) and `<prefix>.pub.pem` (public).
///
/// Returns the two paths written.
pub fn write_keypair(
    key: &SigningKey,
    prefix: &Path,
) -> Result<(PathBuf, PathBuf), IdentityError> {
    let (private_path, public_path) = keypair_paths(prefix);

    let private_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| IdentityError::InvalidKey {
            path: private_path.clone(),
            reason: e.to_string(),
        })?;
    let public_pem = key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| IdentityError::InvalidKey {
            path: public_path.clone(),
            reason: e.to_string(),
        })?;

    if let Some(parent) = private_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_private(&private_path, private_pem.as_bytes())?;
    std::fs::write(&public_path, public_pem)?;
    Ok((private_path, public_path))
}

/// Short hex fingerprint of a public key, for logs.
pub fn fingerprint(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}

/// Paths of the private and public key files for `prefix`:
/// `<prefix>.pem` and `<prefix>.pub.pem`.
pub fn keypair_paths(prefix: &Path) -> (PathBuf, PathBuf) {
    (with_suffix(prefix, ".pem"), with_suffix(prefix, ".pub.pem"))
}

/// Writes a secret that is owner-only from the moment it is created.
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    // An existing file keeps its old mode, so tighten it before writing.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.sync_all()
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// A public key the receiver accepts senders for.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    key: VerifyingKey,
    fingerprint: String,
}

impl TrustedKey {
    pub fn new(key: VerifyingKey) -> Self {
        let fingerprint = fingerprint(&key);
        Self { key, fingerprint }
    }

    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// The receiver's set of trusted sender keys. Never empty.
#[derive(Debug, Clone)]
pub struct TrustedKeys {
    keys: Vec<TrustedKey>,
}

impl TrustedKeys {
    pub fn new(keys: impl IntoIterator<Item = VerifyingKey>) -> Result<Self, IdentityError> {
        let keys: Vec<TrustedKey> = keys.into_iter().map(TrustedKey::new).collect();
        if keys.is_empty() {
            return Err(IdentityError::NoTrustedKeys);
        }
        Ok(Self { keys })
    }

    /// Loads every public key file in `paths`.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, IdentityError> {
        let keys = paths
            .iter()
            .map(|p| load_verifying_key(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let trusted = Self::new(keys)?;
        info!(count = trusted.len(), "trusted sender keys loaded");
        Ok(trusted)
    }

    /// Returns the first trusted key whose strict verification of
    /// `signature` over `message` succeeds.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Option<&TrustedKey> {
        self.keys
            .iter()
            .find(|k| k.key.verify_strict(message, signature).is_ok())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer;

    #[test]
    fn keypair_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_signing_key();

        let (private_path, public_path) = write_keypair(&key, &dir.path().join("sender")).unwrap();
        assert!(private_path.ends_with("sender.pem"));
        assert!(public_path.ends_with("sender.pub.pem"));

        let loaded = load_signing_key(&private_path).unwrap();
        assert_eq!(loaded.to_bytes(), key.to_bytes());

        let public = load_verifying_key(&public_path).unwrap();
        assert_eq!(public, key.verifying_key());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let (private_path, _) =
            write_keypair(&generate_signing_key(), &dir.path().join("k")).unwrap();
        let mode = std::fs::metadata(private_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn overwritten_private_key_is_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("k");
        let (private_path, _) = keypair_paths(&prefix);
        std::fs::write(&private_path, "old").unwrap();
        std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let key = generate_signing_key();
        write_keypair(&key, &prefix).unwrap();
        let mode = std::fs::metadata(&private_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(load_signing_key(&private_path).unwrap().to_bytes(), key.to_bytes());
    }

    #[test]
    fn keypair_paths_append_to_prefix() {
        let (private_path, public_path) = keypair_paths(Path::new("keys/alice.v2"));
        assert_eq!(private_path, Path::new("keys/alice.v2.pem"));
        assert_eq!(public_path, Path::new("keys/alice.v2.pub.pem"));
    }

    #[test]
    fn garbage_key_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pem");
        std::fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            load_signing_key(&path),
            Err(IdentityError::InvalidKey { .. })
        ));
        assert!(matches!(
            load_verifying_key(&path),
            Err(IdentityError::InvalidKey { .. })
        ));
    }

    #[test]
    fn missing_key_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_signing_key(&dir.path().join("absent.pem")),
            Err(IdentityError::Io(_))
        ));
    }

    #[test]
    fn empty_trust_set_rejected() {
        assert!(matches!(
            TrustedKeys::new(Vec::new()),
            Err(IdentityError::NoTrustedKeys)
        ));
    }

    #[test]
    fn verify_picks_matching_key() {
        let a = generate_signing_key();
        let b = generate_signing_key();
        let trusted = TrustedKeys::new([a.verifying_key(), b.verifying_key()]).unwrap();

        let sig = b.sign(b"nonce");
        let hit = trusted.verify(b"nonce", &sig).unwrap();
        assert_eq!(hit.fingerprint(), fingerprint(&b.verifying_key()));
    }

    #[test]
    fn verify_rejects_untrusted_signer() {
        let trusted = TrustedKeys::new([generate_signing_key().verifying_key()]).unwrap();
        let stranger = generate_signing_key();
        let sig = stranger.sign(b"nonce");
        assert!(trusted.verify(b"nonce", &sig).is_none());
    }

    #[test]
    fn verify_rejects_other_message() {
        let key = generate_signing_key();
        let trusted = TrustedKeys::new([key.verifying_key()]).unwrap();
        let sig = key.sign(b"nonce-1");
        assert!(trusted.verify(b"nonce-2", &sig).is_none());
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let fp = fingerprint(&generate_signing_key().verifying_key());
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
