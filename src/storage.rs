use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use crate::error::{EtlError, Result};

pub mod columnar;
pub mod lakehouse;

pub use lakehouse::Lakehouse;

/// Read-only object storage the raw extract is fetched from. The pipeline
/// only ever reads one object per run; writes go through [`Lakehouse`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of the object at `path`.
    async fn fetch(&self, path: &str) -> Result<Bytes>;
}

/// Blob store backed by a locally mounted container directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        let abs = self.root.join(path);
        debug!(path = %abs.display(), "fetching object");
        match fs::read(&abs).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) => Err(EtlError::Blob {
                path: abs.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// In-memory blob store for development and testing.
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, path: impl Into<String>, contents: impl Into<Bytes>) {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(path.into(), contents.into());
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.lock().unwrap();
        objects.get(path).cloned().ok_or_else(|| EtlError::Blob {
            path: path.to_string(),
            message: "object not found".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fs_store_reads_an_object_under_its_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("raw")).unwrap();
        std::fs::write(tmp.path().join("raw/sales_data.csv"), b"a,b\n1,2\n").unwrap();

        let store = FsBlobStore::new(tmp.path());
        let bytes = store.fetch("raw/sales_data.csv").await.unwrap();
        assert_eq!(&bytes[..], b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn missing_object_is_a_blob_error() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        let err = store.fetch("raw/absent.csv").await.unwrap_err();
        assert!(matches!(err, EtlError::Blob { .. }));
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryBlobStore::new();
        store.put("raw/sales_data.csv", &b"x"[..]);
        let bytes = store.fetch("raw/sales_data.csv").await.unwrap();
        assert_eq!(&bytes[..], b"x");
        assert!(store.fetch("other").await.is_err());
    }
}
