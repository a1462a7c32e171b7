//! Challenge nonce generation.

use ferry_protocol::NONCE_LEN;
use rand::Rng;

/// Generates a fresh CSPRNG nonce for one handshake.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut bytes);
    bytes
}
