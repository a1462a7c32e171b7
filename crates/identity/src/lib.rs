//! Sender identity and the authentication handshake.
//!
//! The receiver challenges every connection with a fresh nonce; the sender
//! proves possession of a trusted Ed25519 key by signing it. No file data is
//! accepted before [`handshake::challenge_peer`] returns an
//! [`Authenticated`] proof.

pub mod error;
pub mod handshake;
pub mod keys;
pub mod nonce;

pub use error::IdentityError;
pub use handshake::{Authenticated, answer_challenge, challenge_peer};
pub use keys::{TrustedKey, TrustedKeys, fingerprint, generate_signing_key};
pub use nonce::generate_nonce;

pub use ed25519_dalek::{SigningKey, VerifyingKey};
