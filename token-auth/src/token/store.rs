//! Encrypted, cached token persistence.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Storage, TokenData};
use crate::crypto::EncryptionManager;
use crate::error::Error;

/// Cached view of the persisted record.
enum Cache {
    Unloaded,
    Loaded(Option<TokenData>),
}

/// The only component that touches the persisted token blob.
///
/// Every operation holds the same async mutex for its whole duration, so loads,
/// saves, removals and the expiry test hooks are serialized per store instance.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    encryption: EncryptionManager,
    cache: Mutex<Cache>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, encryption: EncryptionManager) -> Self {
        Self {
            storage,
            encryption,
            cache: Mutex::new(Cache::Unloaded),
        }
    }

    /// Load the stored tokens.
    ///
    /// Returns `None` when nothing is stored, or when the stored record cannot be
    /// decrypted or parsed. Corrupt data means "logged out".
    pub async fn load_tokens(&self) -> Option<TokenData> {
        let mut cache = self.cache.lock().await;
        self.load_locked(&mut cache).await
    }

    /// Serialize, encrypt and persist `data`, replacing any previous record.
    ///
    /// The in-memory copy is updated before persisting, so the running process keeps
    /// the new tokens even when the key store or the disk fails; the persistence
    /// error is still returned.
    pub async fn save_tokens(&self, data: TokenData) -> Result<(), Error> {
        let mut cache = self.cache.lock().await;
        *cache = Cache::Loaded(Some(data.clone()).filter(|d| !d.is_empty()));
        self.persist(&data).await
    }

    /// Delete the persisted record entirely.
    pub async fn remove_tokens(&self) -> Result<(), Error> {
        let mut cache = self.cache.lock().await;
        *cache = Cache::Loaded(None);
        self.storage.delete().await?;
        debug!("Removed stored tokens");
        Ok(())
    }

    /// Test hook: corrupt the stored access token so the API rejects it.
    pub async fn expire_access_token(&self) -> Result<(), Error> {
        let mut cache = self.cache.lock().await;
        let Some(mut data) = self.load_locked(&mut cache).await else {
            return Ok(());
        };
        let corrupted = data.access_token().map(|token| format!("{}x", token));
        if corrupted.is_some() {
            data.access_token = corrupted;
        }
        *cache = Cache::Loaded(Some(data.clone()));
        self.persist(&data).await
    }

    /// Test hook: corrupt the stored refresh token and drop the access token, so the
    /// next API call performs a refresh that the authorization server rejects.
    pub async fn expire_refresh_token(&self) -> Result<(), Error> {
        let mut cache = self.cache.lock().await;
        let Some(mut data) = self.load_locked(&mut cache).await else {
            return Ok(());
        };
        let corrupted = data.refresh_token().map(|token| format!("{}x", token));
        if corrupted.is_some() {
            data.refresh_token = corrupted;
        }
        data.access_token = None;
        *cache = Cache::Loaded(Some(data.clone()));
        self.persist(&data).await
    }

    async fn load_locked(&self, cache: &mut Cache) -> Option<TokenData> {
        if let Cache::Loaded(data) = cache {
            return data.clone();
        }
        let data = self.read_persisted().await;
        *cache = Cache::Loaded(data.clone());
        data
    }

    async fn read_persisted(&self) -> Option<TokenData> {
        let blob = match self.storage.read().await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!("Unable to read stored tokens: {}", e);
                return None;
            }
        };

        let json = match self.encryption.decrypt(&blob) {
            Ok(json) => json,
            Err(e) => {
                warn!("Discarding stored tokens that could not be decrypted: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<TokenData>(&json) {
            Ok(data) if data.is_empty() => None,
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Discarding stored tokens that could not be parsed: {}", e);
                None
            }
        }
    }

    async fn persist(&self, data: &TokenData) -> Result<(), Error> {
        let json = serde_json::to_string(data)?;
        let blob = self.encryption.encrypt(&json)?;
        self.storage.write(&blob).await
    }
}
