//! PKCE (RFC 7636) and the random request values of an authorization request.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE code verifier. Kept secret until it is sent to the token endpoint.
#[derive(Debug, Clone)]
pub struct PkceVerifier(SecretString);

impl PkceVerifier {
    /// Generate a 43 character verifier from 32 random bytes.
    pub fn generate() -> Self {
        Self(SecretString::new(random_url_safe(32)))
    }

    pub fn from_string(verifier: String) -> Self {
        Self(SecretString::new(verifier))
    }

    pub fn secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn challenge(&self) -> PkceChallenge {
        PkceChallenge::from_verifier(self)
    }
}

/// base64url(SHA-256(verifier)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = Sha256::digest(verifier.secret().as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Random url-safe value used for `state` and `nonce`.
pub fn random_url_safe(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill(buffer.as_mut_slice());
    URL_SAFE_NO_PAD.encode(buffer)
}
