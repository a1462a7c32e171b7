//! Wire protocol for ferry sender/receiver communication.
//!
//! Every exchange between the two endpoints is a length-prefixed frame
//! carrying one [`Message`]. The [`framer`] module owns the framing, the
//! [`messages`] module owns the payload encoding.
//!
//! # Wire format
//!
//! See [`messages`] for the per-message binary layout.

pub mod error;
pub mod framer;
pub mod identity;
pub mod messages;

pub use error::WireError;
pub use framer::Framer;
pub use identity::{FileIdentity, validate_file_name};
pub use messages::{Message, RejectCode};

/// Protocol version advertised in the receiver's challenge.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum payload carried by a single `Chunk` message (64 KiB).
///
/// Also the resume granularity: a crash loses at most one chunk of progress.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Number of leading bytes hashed into a [`FileIdentity`].
pub const HEAD_BLOCK_SIZE: usize = 4096;

/// Upper bound on a frame payload. Larger length headers are rejected
/// before any allocation.
pub const MAX_FRAME_SIZE: usize = CHUNK_SIZE + 4096;

/// Challenge nonce length in bytes.
pub const NONCE_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// SHA-256 digest length in bytes.
pub const DIGEST_LEN: usize = 32;

/// Longest accepted file name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A SHA-256 digest.
pub type Digest = [u8; DIGEST_LEN];
