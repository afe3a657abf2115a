//! PKCE (RFC 7636) and CSRF state generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Sent with the code exchange
    pub verifier: String,
    /// Sent with the authorization request
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair: 30 random bytes hex encoded as the verifier.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 30] = rand::rng().random();
        let verifier = hex::encode(bytes);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// `base64url-no-pad(SHA-256(verifier))`
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random CSRF state: 20 random bytes, hex encoded.
#[must_use]
pub fn generate_state() -> String {
    let bytes: [u8; 20] = rand::rng().random();
    hex::encode(bytes)
}

/// Constant-time comparison of a returned state with the expected one.
#[must_use]
pub fn state_matches(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}
