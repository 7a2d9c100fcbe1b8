//! Blob store seam and its object storage implementation (S3/MinIO, local
//! file system or in-memory).

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use std::sync::Arc;
use tracing::{debug, instrument};

use rainfields_common::{GridError, GridResult};

use crate::config::BlobStoreConfig;
use crate::record::BlobRef;

/// Named binary objects, grouped into buckets.
///
/// Each call is atomic for a single object; nothing spans calls.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write bytes under `bucket/name`, replacing any object already there.
    async fn put(&self, bucket: &str, name: &str, data: Bytes) -> GridResult<BlobRef>;

    /// Read an object. `None` if it does not exist.
    async fn get(&self, blob: &BlobRef) -> GridResult<Option<Bytes>>;

    /// Delete an object. Returns whether it existed.
    async fn delete(&self, blob: &BlobRef) -> GridResult<bool>;
}

/// Blob store backed by the `object_store` crate.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    label: String,
    max_payload_bytes: Option<usize>,
}

impl ObjectBlobStore {
    /// Create a blob store from config.
    pub fn new(config: &BlobStoreConfig) -> GridResult<Self> {
        let (store, label): (Arc<dyn ObjectStore>, String) = match config {
            BlobStoreConfig::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
                ..
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(bucket)
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
                    .with_region(region);

                if *allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder.build().map_err(|e| {
                    GridError::StoreUnavailable(format!("Failed to create S3 client: {}", e))
                })?;
                (Arc::new(store), format!("s3://{}", bucket))
            }
            BlobStoreConfig::Local { root, .. } => {
                std::fs::create_dir_all(root).map_err(|e| {
                    GridError::StoreUnavailable(format!(
                        "Failed to create {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
                    GridError::StoreUnavailable(format!(
                        "Failed to open {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                (Arc::new(store), format!("file://{}", root.display()))
            }
            BlobStoreConfig::Memory { .. } => (Arc::new(InMemory::new()), "memory".to_string()),
        };

        Ok(Self {
            store,
            label,
            max_payload_bytes: config.max_payload_bytes(),
        })
    }

    /// An empty in-memory store without a size limit.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            label: "memory".to_string(),
            max_payload_bytes: None,
        }
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = Some(limit);
        self
    }

    /// List object references in a bucket.
    pub async fn list(&self, bucket: &str) -> GridResult<Vec<BlobRef>> {
        let prefix = Path::from_iter([bucket]);
        let mut refs = Vec::new();

        let mut stream = self.store.list(Some(&prefix));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| GridError::StoreUnavailable(format!("List failed: {}", e)))?
        {
            refs.push(BlobRef(meta.location.to_string()));
        }

        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }

    fn location(blob: &BlobRef) -> GridResult<Path> {
        Path::parse(blob.as_str()).map_err(|e| {
            GridError::Serialization(format!("Invalid blob reference {}: {}", blob, e))
        })
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    #[instrument(skip(self, data), fields(store = %self.label, size = data.len()))]
    async fn put(&self, bucket: &str, name: &str, data: Bytes) -> GridResult<BlobRef> {
        if let Some(limit) = self.max_payload_bytes {
            if data.len() > limit {
                return Err(GridError::PayloadTooLarge {
                    size: data.len(),
                    limit,
                });
            }
        }

        let location = Path::parse(format!("{}/{}", bucket, name)).map_err(|e| {
            GridError::Serialization(format!("Invalid blob name {}/{}: {}", bucket, name, e))
        })?;

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| {
                GridError::StoreUnavailable(format!("Failed to write {}: {}", location, e))
            })?;

        debug!(path = %location, "Wrote blob");
        Ok(BlobRef(location.to_string()))
    }

    #[instrument(skip(self), fields(store = %self.label))]
    async fn get(&self, blob: &BlobRef) -> GridResult<Option<Bytes>> {
        let location = Self::location(blob)?;

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(GridError::StoreUnavailable(format!(
                    "Failed to read {}: {}",
                    blob, e
                )))
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| GridError::StoreUnavailable(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read blob");
        Ok(Some(bytes))
    }

    #[instrument(skip(self), fields(store = %self.label))]
    async fn delete(&self, blob: &BlobRef) -> GridResult<bool> {
        let location = Self::location(blob)?;

        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => {
                return Err(GridError::StoreUnavailable(format!(
                    "Failed to check {}: {}",
                    blob, e
                )))
            }
        }

        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => {
                return Err(GridError::StoreUnavailable(format!(
                    "Failed to delete {}: {}",
                    blob, e
                )))
            }
        }

        debug!("Deleted blob");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = ObjectBlobStore::in_memory();
        let blob = store
            .put("AKL.rain", "AKL_RATE_2024-01-01T00:00:00_None_None.nc", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(blob.as_str(), "AKL.rain/AKL_RATE_2024-01-01T00:00:00_None_None.nc");

        assert_eq!(store.get(&blob).await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert!(store.delete(&blob).await.unwrap());
        assert_eq!(store.get(&blob).await.unwrap(), None);
        assert!(!store.delete(&blob).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_replaces_in_place() {
        let store = ObjectBlobStore::in_memory();
        store.put("AKL.state", "a.npz", Bytes::from_static(b"one")).await.unwrap();
        let blob = store.put("AKL.state", "a.npz", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(store.list("AKL.state").await.unwrap(), vec![blob.clone()]);
        assert_eq!(store.get(&blob).await.unwrap(), Some(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_payload_limit() {
        let store = ObjectBlobStore::in_memory().with_max_payload_bytes(4);
        let err = store
            .put("AKL.rain", "big.nc", Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::PayloadTooLarge { size: 5, limit: 4 }));
        assert!(store.list("AKL.rain").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig::Local {
            root: dir.path().join("blobs"),
            max_payload_bytes: None,
        };
        let store = ObjectBlobStore::new(&config).unwrap();
        let blob = store.put("WLG.rain", "x.nc", Bytes::from_static(b"grid")).await.unwrap();
        assert!(dir.path().join("blobs/WLG.rain/x.nc").exists());
        assert_eq!(store.get(&blob).await.unwrap(), Some(Bytes::from_static(b"grid")));
    }
}
