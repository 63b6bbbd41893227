use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{RetryPolicy, SyncError};
use crate::cache::LocalCache;
use crate::catalog::CatalogError;
use crate::chunk::{ChunkRef, ContentHash, FileId};
use crate::crypto::{ChunkCodec, SealedChunk, SessionKeyManager};
use crate::store::{ChunkStore, StoreError};

/// The cache -> store -> codec chain shared by reads and commits.
///
/// Every remote call is wrapped in the configured timeout; a timeout is
/// reported as a retryable error of the collaborator that stalled.
#[derive(Debug, Clone)]
pub struct ChunkIo {
    pub(crate) store: Arc<dyn ChunkStore>,
    pub(crate) cache: Arc<LocalCache>,
    pub(crate) keys: Arc<SessionKeyManager>,
    pub(crate) codec: ChunkCodec,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Duration,
}

impl ChunkIo {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        cache: Arc<LocalCache>,
        keys: Arc<SessionKeyManager>,
        codec: ChunkCodec,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            codec,
            retry,
            timeout,
        }
    }

    pub fn codec(&self) -> &ChunkCodec {
        &self.codec
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn keys(&self) -> &Arc<SessionKeyManager> {
        &self.keys
    }

    /// Plaintext of a committed chunk, verified, from cache or store.
    pub async fn fetch(&self, chunk: &ChunkRef, file_id: &FileId) -> Result<Bytes, SyncError> {
        if let Some(bytes) = self.cache.get(&chunk.hash) {
            return Ok(bytes);
        }

        let ciphertext = self
            .retry
            .run(|| false, |_| self.get_remote(&chunk.storage_key))
            .await
            .map_err(SyncError::from_retry)?;

        let key = self.keys.derive_file_key(file_id)?;
        let plaintext = match self.codec.decrypt(&ciphertext, chunk, &key, file_id) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::error!(%file_id, chunk = %chunk.hash.short(), error = %e, "rejected chunk");
                return Err(e.into());
            }
        };
        self.cache.put(chunk.hash, plaintext.clone(), false)?;
        Ok(plaintext)
    }

    async fn get_remote(&self, key: &ContentHash) -> Result<Bytes, SyncError> {
        self.store_call(self.store.get(key)).await
    }

    /// Upload a sealed chunk unless the store already has it.
    pub async fn upload(&self, sealed: &SealedChunk) -> Result<(), SyncError> {
        let key = &sealed.chunk.storage_key;
        if self.store_call(self.store.exists(key)).await? {
            tracing::trace!(chunk = %key.short(), "chunk already stored");
            return Ok(());
        }
        self.store_call(self.store.put(key, sealed.ciphertext.clone()))
            .await
    }

    pub(crate) async fn store_call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }

    pub(crate) async fn catalog_call<T>(
        &self,
        fut: impl Future<Output = Result<T, CatalogError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(CatalogError::Timeout.into()),
        }
    }
}
