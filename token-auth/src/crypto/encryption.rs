//! AES-256-GCM encryption of the persisted token blob.
//!
//! Wire format: base64(`nonce (12 bytes) || ciphertext || tag (16 bytes)`). The nonce
//! is split back off by its fixed length, so no delimiter can collide with payload bytes.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use secrecy::ExposeSecret;

use super::key_store::{KeyStore, KEY_SIZE};
use crate::error::{Error, ErrorKind, StorageErrorKind};

/// 12-byte nonce size for AES-GCM
pub const NONCE_SIZE: usize = 12;

fn encryption_err() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
    }
}

fn decryption_err() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
    }
}

/// Encrypts and decrypts strings with a key that lives in a [`KeyStore`] under a
/// fixed alias. The key is fetched (and generated on first use) per operation, so
/// it is never cached by this type.
#[derive(Clone)]
pub struct EncryptionManager {
    key_store: Arc<dyn KeyStore>,
    key_alias: String,
}

impl EncryptionManager {
    pub fn new(key_store: Arc<dyn KeyStore>, key_alias: impl Into<String>) -> Self {
        Self {
            key_store,
            key_alias: key_alias.into(),
        }
    }

    /// Encrypts plaintext using AES-256-GCM with a random nonce.
    ///
    /// # Returns
    /// Base64-encoded string containing nonce + ciphertext + tag
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| encryption_err())?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypts a base64-encoded payload produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with `DecryptionFailed` on malformed input, a tampered payload or a
    /// different key; authenticated decryption never returns altered bytes.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, Error> {
        let cipher = self.cipher()?;

        let combined = BASE64.decode(ciphertext_b64.trim()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(decryption_err());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| decryption_err())?;

        String::from_utf8(plaintext_bytes).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm, Error> {
        let key_hex = self.key_store.get_or_create_key(&self.key_alias)?;
        let key = parse_key(key_hex.expose_secret())?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| key_unavailable_err())
    }
}

fn key_unavailable_err() -> Error {
    Error {
        source: Some("stored key is not a 32-byte hex string".into()),
        error_kind: ErrorKind::Storage(StorageErrorKind::KeyUnavailable),
    }
}

fn parse_key(key_hex: &str) -> Result<[u8; KEY_SIZE], Error> {
    let bytes = hex::decode(key_hex).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Storage(StorageErrorKind::KeyUnavailable),
    })?;
    if bytes.len() != KEY_SIZE {
        return Err(key_unavailable_err());
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
