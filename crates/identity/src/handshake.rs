//! Challenge/response authentication.
//!
//! ```text
//! Receiver -> Sender: Challenge { version, nonce }
//! Sender -> Receiver: Response { signature = Ed25519(sender_key, nonce) }
//! Receiver -> Sender: AuthOk | AuthFailed
//! ```
//!
//! Failure is terminal for the connection.

use ed25519_dalek::{Signature, Signer, SigningKey};
use ferry_protocol::{Framer, Message, PROTOCOL_VERSION, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::IdentityError;
use crate::keys::{TrustedKeys, fingerprint};
use crate::nonce::generate_nonce;

/// Proof that the peer on a connection signed this connection's nonce with
/// a trusted key. Only [`challenge_peer`] can construct it.
#[derive(Debug, Clone)]
pub struct Authenticated {
    fingerprint: String,
}

impl Authenticated {
    /// Fingerprint of the trusted key that matched.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Receiver side: challenges the peer and verifies its signature.
///
/// Sends `AuthFailed` before returning an error for a bad or unexpected
/// response.
pub async fn challenge_peer<S>(
    framer: &mut Framer<S>,
    trusted: &TrustedKeys,
) -> Result<Authenticated, IdentityError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce = generate_nonce();
    framer
        .write_message(&Message::Challenge {
            version: PROTOCOL_VERSION,
            nonce,
        })
        .await?;

    let signature = match framer.read_message().await? {
        Message::Response { signature } => Signature::from_bytes(&signature),
        other => {
            warn!(kind = other.kind(), "handshake: expected Response");
            framer.write_message(&Message::AuthFailed).await?;
            return Err(IdentityError::Wire(WireError::Protocol(format!(
                "expected Response, got {}",
                other.kind()
            ))));
        }
    };

    match trusted.verify(&nonce, &signature) {
        Some(key) => {
            framer.write_message(&Message::AuthOk).await?;
            info!(sender = %key.fingerprint(), "handshake: sender authenticated");
            Ok(Authenticated {
                fingerprint: key.fingerprint().to_string(),
            })
        }
        None => {
            warn!("handshake: signature matches no trusted key");
            framer.write_message(&Message::AuthFailed).await?;
            Err(IdentityError::AuthenticationFailed(
                "signature matches no trusted key".into(),
            ))
        }
    }
}

/// Sender side: answers the receiver's challenge.
pub async fn answer_challenge<S>(
    framer: &mut Framer<S>,
    key: &SigningKey,
) -> Result<(), IdentityError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce = match framer.read_message().await? {
        Message::Challenge { version, nonce } => {
            if version != PROTOCOL_VERSION {
                return Err(IdentityError::Wire(WireError::Protocol(format!(
                    "unsupported protocol version {version} (expected {PROTOCOL_VERSION})"
                ))));
            }
            nonce
        }
        other => {
            return Err(IdentityError::Wire(WireError::Protocol(format!(
                "expected Challenge, got {}",
                other.kind()
            ))));
        }
    };

    let signature = key.sign(&nonce);
    framer
        .write_message(&Message::Response {
            signature: signature.to_bytes(),
        })
        .await?;
    debug!(key = %fingerprint(&key.verifying_key()), "handshake: challenge signed");

    match framer.read_message().await? {
        Message::AuthOk => {
            info!("handshake: accepted by receiver");
            Ok(())
        }
        Message::AuthFailed => Err(IdentityError::AuthenticationFailed(
            "receiver rejected signature".into(),
        )),
        other => Err(IdentityError::Wire(WireError::Protocol(format!(
            "expected AuthOk/AuthFailed, got {}",
            other.kind()
        )))),
    }
}
