//! Persistence backends for the encrypted token blob.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Error;

/// Trait for persisting the single encrypted token blob.
///
/// Implementations only move opaque text around; encryption and serialization are
/// the [`TokenStore`](super::TokenStore)'s job. Writes must replace any previous
/// value atomically from the reader's point of view.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the stored blob, `None` if nothing has been stored.
    async fn read(&self) -> Result<Option<String>, Error>;

    /// Replace the stored blob.
    async fn write(&self, blob: &str) -> Result<(), Error>;

    /// Remove the stored blob. Removing a missing blob is not an error.
    async fn delete(&self) -> Result<(), Error>;
}

/// Stores the blob in a single file, written through a temporary sibling file and
/// renamed into place.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self) -> Result<Option<String>, Error> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(blob) if blob.trim().is_empty() => Ok(None),
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, blob: &str) -> Result<(), Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, blob).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the blob in memory only.
#[derive(Default)]
pub struct MemoryStorage {
    blob: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that already holds `blob`, for simulating previously
    /// persisted (or corrupted) data.
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self) -> Result<Option<String>, Error> {
        Ok(self.blob.lock().await.clone())
    }

    async fn write(&self, blob: &str) -> Result<(), Error> {
        *self.blob.lock().await = Some(blob.to_string());
        Ok(())
    }

    async fn delete(&self) -> Result<(), Error> {
        *self.blob.lock().await = None;
        Ok(())
    }
}
