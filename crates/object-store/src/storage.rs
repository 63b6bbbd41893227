//! Chunk storage over an object store (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use common::chunk::ContentHash;
use common::store::{ChunkStore, StoreError};

use crate::error::{store_error, BackendError, Result};

/// Configuration for the chunk storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

impl std::fmt::Display for ChunkStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkStoreConfig::Memory => write!(f, "memory"),
            ChunkStoreConfig::Local { path } => write!(f, "local:{}", path.display()),
            ChunkStoreConfig::S3 {
                endpoint, bucket, ..
            } => write!(f, "s3:{}/{}", endpoint, bucket),
        }
    }
}

/// Ciphertext chunks stored as objects under `chunks/<hh>/<hex>`.
#[derive(Debug, Clone)]
pub struct ObjectChunkStore {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectChunkStore {
    /// Create a new chunk store from configuration.
    pub async fn new(config: ChunkStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ChunkStoreConfig::Memory => Arc::new(InMemory::new()),

            ChunkStoreConfig::Local { path } => {
                // Ensure directory exists
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| BackendError::InvalidConfig(e.to_string()))?,
                )
            }

            ChunkStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| BackendError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket doesn't exist
                {
                    use futures::TryStreamExt;
                    let prefix = ObjectPath::from("chunks");
                    let mut stream = store.list(Some(&prefix));
                    match stream.try_next().await {
                        Ok(_) => {}
                        Err(object_store::Error::NotFound { .. }) => {
                            return Err(BackendError::BucketNotFound(bucket.clone()));
                        }
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("NoSuchBucket") {
                                return Err(BackendError::BucketNotFound(bucket.clone()));
                            }
                            return Err(e.into());
                        }
                    }
                }

                store
            }
        };

        tracing::info!(backend = %config, "chunk store ready");
        Ok(Self { inner })
    }

    /// Ephemeral in-memory store
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Object path of a chunk, fanned out by the first key byte.
    fn chunk_path(key: &ContentHash) -> ObjectPath {
        let hex = key.to_hex();
        ObjectPath::from(format!("chunks/{}/{}", &hex[..2], hex))
    }

    /// Every stored chunk key. Objects whose name is not a key are skipped.
    pub async fn list_keys(&self) -> Result<Vec<ContentHash>> {
        use futures::TryStreamExt;

        let prefix = ObjectPath::from("chunks");
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;
        let keys = items
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?.to_string();
                match ContentHash::from_hex(&name) {
                    Ok(key) => Some(key),
                    Err(_) => {
                        tracing::warn!(location = %meta.location, "ignoring foreign object");
                        None
                    }
                }
            })
            .collect();
        Ok(keys)
    }
}

#[async_trait]
impl ChunkStore for ObjectChunkStore {
    async fn put(&self, key: &ContentHash, ciphertext: Bytes) -> std::result::Result<(), StoreError> {
        let path = Self::chunk_path(key);
        let len = ciphertext.len();
        // content addressed, so overwriting an existing object is harmless
        self.inner
            .put(&path, ciphertext.into())
            .await
            .map_err(store_error)?;
        tracing::debug!(chunk = %key.short(), len, "chunk stored");
        Ok(())
    }

    async fn get(&self, key: &ContentHash) -> std::result::Result<Bytes, StoreError> {
        let path = Self::chunk_path(key);
        match self.inner.get(&path).await {
            Ok(result) => result.bytes().await.map_err(store_error),
            Err(object_store::Error::NotFound { .. }) => Err(StoreError::NotFound(*key)),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn exists(&self, key: &ContentHash) -> std::result::Result<bool, StoreError> {
        let path = Self::chunk_path(key);
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn delete(&self, key: &ContentHash) -> std::result::Result<(), StoreError> {
        let path = Self::chunk_path(key);
        // Ignore NotFound errors - the chunk may already be deleted
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(chunk = %key.short(), "chunk deleted");
                Ok(())
            }
            Err(e) => Err(store_error(e)),
        }
    }
}
