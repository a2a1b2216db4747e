//! PKCE (RFC 7636) parameter generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes behind a state value
pub const STATE_BYTES: usize = 16;

/// Random bytes behind a code verifier
pub const VERIFIER_BYTES: usize = 64;

/// Generate a PKCE code verifier and its S256 challenge
pub fn generate_pkce() -> (String, String) {
    let mut rng = rand::rng();
    let mut verifier_bytes = [0u8; VERIFIER_BYTES];
    for chunk in verifier_bytes.chunks_mut(32) {
        let part: [u8; 32] = rng.random();
        chunk.copy_from_slice(&part[..chunk.len()]);
    }
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = challenge_for(&verifier);

    (verifier, challenge)
}

/// S256 challenge: base64url (no padding) of SHA-256 over the verifier text
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state parameter
pub fn generate_state() -> String {
    let state_bytes: [u8; STATE_BYTES] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
