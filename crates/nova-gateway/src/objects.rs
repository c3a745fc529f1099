//! Minimal object-store seam for uploaded files.
//!
//! The real deployment fronts an S3-compatible store; the fabric only needs
//! put/get by key, so the contract stays that small and the bundled
//! implementation writes beneath a local root.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{ApiError, ApiResult};

/// Byte storage keyed by object name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, creating parents as needed.
    async fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()>;

    /// Fetch bytes by key.
    async fn get(&self, key: &str) -> ApiResult<Vec<u8>>;
}

/// Filesystem-backed object store.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> ApiResult<PathBuf> {
        let relative = Path::new(key);
        // Keys come from our own upload path, but never trust them anyway.
        let traverses = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if traverses || key.is_empty() {
            return Err(ApiError::BadRequest(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("root", &self.root)
            .finish()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ApiResult<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::NotFound(format!("object {key:?}")))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put("uploads/demo-org/1_manual.txt", b"content")
            .await
            .unwrap();
        let bytes = store.get("uploads/demo-org/1_manual.txt").await.unwrap();
        assert_eq!(bytes, b"content");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("nope").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", b"x").await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
