//! Durable content-addressed storage for encrypted chunks.
//!
//! The engine only talks to a [`ChunkStore`] through this trait; concrete
//! backends (memory, local disk, S3) are chosen when a session is mounted.

use async_trait::async_trait;
use bytes::Bytes;

use crate::chunk::ContentHash;

mod memory;

pub use memory::MemoryChunkStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk not found: {0}")]
    NotFound(ContentHash),
    /// Transient failure reaching the backend
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out")]
    Timeout,
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a caller may retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Network(_) | StoreError::Timeout)
    }
}

/// Ciphertext blob storage keyed by the BLAKE3 hash of the ciphertext.
#[async_trait]
pub trait ChunkStore: Send + Sync + std::fmt::Debug + 'static {
    /// Store `ciphertext` under `key`. Storing an existing key is a no-op.
    async fn put(&self, key: &ContentHash, ciphertext: Bytes) -> Result<(), StoreError>;

    /// Fetch the ciphertext stored under `key`.
    ///
    /// Fails with [`StoreError::NotFound`] if it is absent.
    async fn get(&self, key: &ContentHash) -> Result<Bytes, StoreError>;

    async fn exists(&self, key: &ContentHash) -> Result<bool, StoreError>;

    /// Remove a blob. Deleting a missing key succeeds.
    async fn delete(&self, key: &ContentHash) -> Result<(), StoreError>;
}
