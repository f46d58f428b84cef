//! Opaque blob store for raw scrape snapshots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Two-method capability interface; the core never assumes a backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed store. Keys are source-id-prefixed relative paths.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are generated by us, but refuse traversal anyway.
        if key.contains("..") || key.starts_with('/') {
            anyhow::bail!("invalid blob key: {key}");
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing blob {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading blob {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let store = FsBlobStore::new("/tmp/carscout-test-blobs");
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn round_trips_bytes() {
        let dir = std::env::temp_dir().join(format!("blobs-{}", uuid::Uuid::new_v4()));
        let store = FsBlobStore::new(&dir);
        store.put("src-1/ad-42.json", b"{\"title\":\"BMW\"}").await.unwrap();
        let bytes = store.get("src-1/ad-42.json").await.unwrap();
        assert_eq!(bytes, b"{\"title\":\"BMW\"}");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
