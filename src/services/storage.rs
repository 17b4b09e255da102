use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::ResultRef;

/// Key-addressed storage for generated artifacts.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist the artifact for `id` and return a handle to it.
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<ResultRef, StorageError>;

    /// Fetch an artifact, `None` if it is not present.
    async fn get(&self, result: &ResultRef) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete an artifact. Deleting a missing artifact succeeds.
    async fn delete(&self, result: &ResultRef) -> Result<(), StorageError>;
}

/// Stores results as `<id>.png` files in a local directory.
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    /// Create the results directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, result: &ResultRef) -> Result<PathBuf, StorageError> {
        let key = result.key();
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<ResultRef, StorageError> {
        let result = ResultRef::for_job(id);
        let path = self.path_for(&result)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(job_id = %id, path = %path.display(), "Saved result file");
        Ok(result)
    }

    async fn get(&self, result: &ResultRef) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(result)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, result: &ResultRef) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(result)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Client for S3-compatible object storage (R2, MinIO, AWS).
pub struct S3ResultStore {
    bucket: Box<Bucket>,
}

impl S3ResultStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ResultStore for S3ResultStore {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<ResultRef, StorageError> {
        let result = ResultRef::for_job(id);
        let response = self
            .bucket
            .put_object_with_content_type(result.key(), &bytes, "image/png")
            .await?;
        if !(200..300).contains(&response.status_code()) {
            return Err(StorageError::Status(response.status_code()));
        }
        Ok(result)
    }

    async fn get(&self, result: &ResultRef) -> Result<Option<Vec<u8>>, StorageError> {
        match self.bucket.get_object(result.key()).await {
            Ok(response) if response.status_code() == 404 => Ok(None),
            Ok(response) if (200..300).contains(&response.status_code()) => {
                Ok(Some(response.to_vec()))
            }
            Ok(response) => Err(StorageError::Status(response.status_code())),
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, result: &ResultRef) -> Result<(), StorageError> {
        match self.bucket.delete_object(result.key()).await {
            Ok(response) if response.status_code() == 404 => Ok(()),
            Ok(response) if (200..300).contains(&response.status_code()) => Ok(()),
            Ok(response) => Err(StorageError::Status(response.status_code())),
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps results in process memory. Used in tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryResultStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<ResultRef, StorageError> {
        let result = ResultRef::for_job(id);
        self.objects.write().await.insert(result.key().to_string(), bytes);
        Ok(result)
    }

    async fn get(&self, result: &ResultRef) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.objects.read().await.get(result.key()).cloned())
    }

    async fn delete(&self, result: &ResultRef) -> Result<(), StorageError> {
        self.objects.write().await.remove(result.key());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 request returned status {0}")]
    Status(u16),

    #[error("Filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid result key: {0}")]
    InvalidKey(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_idempotent_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path().join("results")).await.unwrap();
        let id = Uuid::new_v4();

        let result = store.put(id, b"PNG...".to_vec()).await.unwrap();
        assert_eq!(result.key(), format!("{id}.png"));
        assert!(store.root().join(result.key()).exists());
        assert_eq!(store.get(&result).await.unwrap(), Some(b"PNG...".to_vec()));

        store.delete(&result).await.unwrap();
        assert_eq!(store.get(&result).await.unwrap(), None);
        store.delete(&result).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path()).await.unwrap();
        let err = store.get(&ResultRef::new("../etc/passwd")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryResultStore::new();
        let result = store.put(Uuid::new_v4(), vec![7; 4]).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&result).await.unwrap(), Some(vec![7; 4]));
        store.delete(&result).await.unwrap();
        store.delete(&result).await.unwrap();
        assert!(store.is_empty().await);
    }
}
