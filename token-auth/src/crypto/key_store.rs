//! Secure key store providers for the token encryption key.
//!
//! The key is generated once, on first use, and afterwards only ever looked up by
//! alias. Key material is handed out wrapped in [`SecretString`] and is consumed
//! exclusively by the [`EncryptionManager`](super::EncryptionManager).

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::error::{storage_error, Error, ErrorKind, StorageErrorKind};

/// Length in bytes of a generated AES-256 key.
pub const KEY_SIZE: usize = 32;

/// Platform-specific provider of named symmetric keys.
pub trait KeyStore: Send + Sync {
    /// Return the hex-encoded key stored under `alias`, generating and storing a new
    /// random key if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns a `StorageErrorKind::KeyUnavailable` error when the backing store
    /// cannot be read or written.
    fn get_or_create_key(&self, alias: &str) -> Result<SecretString, Error>;
}

fn generate_key_hex() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

/// Key store backed by the operating system credential store
/// (Keychain, Credential Manager or Secret Service) through the `keyring` crate.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    /// Create a key store that namespaces its entries under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn key_unavailable(err: keyring::Error) -> Error {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::KeyUnavailable),
        }
    }
}

impl KeyStore for KeyringKeyStore {
    fn get_or_create_key(&self, alias: &str) -> Result<SecretString, Error> {
        let entry = keyring::Entry::new(&self.service, alias).map_err(Self::key_unavailable)?;

        match entry.get_password() {
            Ok(key_hex) => {
                debug!("Loaded token encryption key '{}' from keyring", alias);
                Ok(SecretString::new(key_hex))
            }
            Err(keyring::Error::NoEntry) => {
                info!("Generating token encryption key '{}' in keyring", alias);
                let key_hex = generate_key_hex();
                entry
                    .set_password(&key_hex)
                    .map_err(Self::key_unavailable)?;
                Ok(SecretString::new(key_hex))
            }
            Err(e) => Err(Self::key_unavailable(e)),
        }
    }
}

/// Process-local key store. Keys live only as long as the instance does, so data
/// encrypted with them cannot be read by a later process.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn get_or_create_key(&self, alias: &str) -> Result<SecretString, Error> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| storage_error(StorageErrorKind::KeyUnavailable, "key store lock poisoned"))?;
        let key_hex = keys
            .entry(alias.to_string())
            .or_insert_with(generate_key_hex)
            .clone();
        Ok(SecretString::new(key_hex))
    }
}
