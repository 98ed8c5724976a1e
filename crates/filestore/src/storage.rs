//! Blob storage abstraction
//!
//! Key-addressed byte storage, decoupled from the metadata database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid key: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Blob store backend
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store data under a key, replacing any previous content
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Retrieve data by key
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete data by key; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Public URL for the key, if this backend serves blobs directly
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }

    /// Get storage name for logging
    fn name(&self) -> &str;
}

/// Local filesystem storage
pub struct LocalStorage {
    /// Root directory for storage
    root: PathBuf,
    /// Base URL the root directory is served under
    base_url: Option<String>,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: None,
        }
    }

    /// Expose stored blobs under `base_url`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a full path
    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        // Prevent directory traversal
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidPath(key.to_string()));
        }

        Ok(self.root.join(key))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    #[instrument(skip(self, data), fields(storage = "local", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve_path(key)?;
        self.ensure_parent(&path).await?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        debug!(path = ?path, "Blob stored");
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve_path(key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// In-memory storage for testing
#[derive(Default)]
pub struct MemoryStorage {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_put_get() {
        let storage = MemoryStorage::new();
        let data = Bytes::from("Hello, World!");

        storage.put("test.bin", data.clone()).await.unwrap();

        let retrieved = storage.get("test.bin").await.unwrap();
        assert_eq!(retrieved, data);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_storage_delete() {
        let storage = MemoryStorage::new();

        storage.put("test.bin", Bytes::from("test data")).await.unwrap();
        assert!(storage.exists("test.bin").await.unwrap());

        storage.delete("test.bin").await.unwrap();
        assert!(!storage.exists("test.bin").await.unwrap());

        // Deleting again is fine
        storage.delete("test.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_not_found() {
        let storage = MemoryStorage::new();

        let result = storage.get("nonexistent.bin").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.put("file-a.bin", Bytes::from("abc")).await.unwrap();
        assert!(storage.exists("file-a.bin").await.unwrap());
        assert_eq!(storage.get("file-a.bin").await.unwrap(), Bytes::from("abc"));

        storage.delete("file-a.bin").await.unwrap();
        assert!(!storage.exists("file-a.bin").await.unwrap());
        assert!(!dir.path().join("file-a.bin").exists());
    }

    #[tokio::test]
    async fn test_local_storage_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(matches!(
            storage.get("missing.bin").await,
            Err(StorageError::NotFound(_))
        ));
        storage.delete("missing.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_storage_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let result = storage.get("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        let result = storage.put("/abs.bin", Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_public_url() {
        let plain = LocalStorage::new("/tmp/blobs");
        assert_eq!(plain.public_url("file-a.bin"), None);

        let served = LocalStorage::new("/tmp/blobs").with_base_url("https://cdn.example.com/files/");
        assert_eq!(
            served.public_url("file-a.bin").as_deref(),
            Some("https://cdn.example.com/files/file-a.bin")
        );
    }
}
