//! PKCE challenge and verifier (RFC 7636).
//!
//! Both flows attach the challenge to the consent URL and replay the
//! verifier during the code exchange, so an intercepted authorization
//! code is useless on its own. This client is public (no secret ships
//! with a desktop binary), which makes PKCE the default, not an option.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A verifier/challenge pair, generated fresh per authorization attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random secret replayed at the token endpoint.
    pub verifier: String,
    /// SHA-256 of the verifier, sent with the consent request.
    pub challenge: String,
    /// Challenge method; this crate only emits `S256`.
    pub method: String,
}

impl PkceChallenge {
    /// Generates a fresh pair: 32 random bytes, base64url without
    /// padding, hashed to the challenge.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = Self::generate_verifier();
        let challenge = Self::compute_challenge(&verifier);

        Self {
            verifier,
            challenge,
            method: "S256".to_string(),
        }
    }

    fn generate_verifier() -> String {
        let random_bytes: Vec<u8> = (0..32).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    fn compute_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        URL_SAFE_NO_PAD.encode(hash)
    }

    /// The secret half, for the code exchange.
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The public half, for the consent URL.
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// The method name advertised alongside the challenge.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Generates a random hex state string for CSRF protection.
#[must_use]
pub(crate) fn generate_state() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    let mut out = String::with_capacity(32);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
