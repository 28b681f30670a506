//! PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
//!
//! Implements RFC 7636 for secure OAuth authorization without client secrets.
//! Used because the extension runs on the user's machine, where a client
//! secret cannot be safely stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43 characters).
/// Per RFC 7636, verifiers must be 43-128 characters long.
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate code challenge from verifier using SHA256
///
/// Per RFC 7636, the challenge is BASE64URL(SHA256(ASCII(code_verifier)))
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a fresh flow nonce
///
/// The nonce correlates an initiated sign-in flow with its eventual callback.
/// It is a UUID-formatted opaque string, single-use per flow attempt, and
/// distinct from the session id generated after a successful exchange.
#[must_use]
pub fn generate_nonce() -> String {
    Uuid::new_v4().to_string()
}

/// PKCE challenge pair for OAuth 2.0 authorization
///
/// Contains the code verifier (sent during token exchange) and the
/// code challenge (sent during the authorization request).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random string (43-128 chars, base64url encoded)
    /// Kept secret until token exchange
    pub code_verifier: String,

    /// SHA256 hash of code_verifier (base64url encoded)
    /// Sent in authorization request for server validation
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair with cryptographically secure
    /// random values
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self { code_verifier, code_challenge }
    }

    /// Get the challenge method (always "S256" for SHA256)
    #[must_use]
    pub fn challenge_method(&self) -> &str {
        "S256"
    }
}
