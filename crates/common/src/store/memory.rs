use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{ChunkStore, StoreError};
use crate::chunk::ContentHash;

/// In-memory chunk store using a HashMap
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    inner: Arc<RwLock<HashMap<ContentHash, Bytes>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// All stored keys, for tests and inspection
    pub fn keys(&self) -> Vec<ContentHash> {
        self.inner.read().keys().copied().collect()
    }

    /// Overwrite a stored blob in place, bypassing content addressing
    pub fn tamper(&self, key: &ContentHash, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(key) {
            Some(bytes) => {
                let mut data = bytes.to_vec();
                f(&mut data);
                *bytes = Bytes::from(data);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, key: &ContentHash, ciphertext: Bytes) -> Result<(), StoreError> {
        self.inner.write().entry(*key).or_insert(ciphertext);
        Ok(())
    }

    async fn get(&self, key: &ContentHash) -> Result<Bytes, StoreError> {
        self.inner
            .read()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound(*key))
    }

    async fn exists(&self, key: &ContentHash) -> Result<bool, StoreError> {
        Ok(self.inner.read().contains_key(key))
    }

    async fn delete(&self, key: &ContentHash) -> Result<(), StoreError> {
        self.inner.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryChunkStore::new();
        let key = ContentHash::of(b"blob");
        assert!(!store.exists(&key).await.unwrap());
        store.put(&key, Bytes::from_static(b"blob")).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"blob"));

        store.delete(&key).await.unwrap();
        assert!(matches!(
            store.get(&key).await,
            Err(StoreError::NotFound(_))
        ));
        // deleting twice is fine
        store.delete(&key).await.unwrap();
    }
}
