//! Encryption of tokens at rest.

mod encryption;
mod key_store;

pub use encryption::{EncryptionManager, NONCE_SIZE};
pub use key_store::{InMemoryKeyStore, KeyStore, KeyringKeyStore, KEY_SIZE};
