//! Shared test utilities for session integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ::common::auth::Principal;
use ::common::catalog::{MemoryCatalog, MetadataCatalog};
use ::common::chunk::ContentHash;
use ::common::config::MountConfig;
use ::common::crypto::Secret;
use ::common::session::Session;
use ::common::store::{ChunkStore, MemoryChunkStore, StoreError};
use ::common::vfs::{OpenMode, VirtualFilesystemBridge};

/// Small blocks and fast backoff so tests exercise chunk boundaries without
/// waiting on retries
pub fn test_config() -> MountConfig {
    MountConfig {
        block_size: 512,
        max_retry_attempts: 3,
        retry_backoff_base_ms: 1,
        retry_backoff_ceiling_ms: 4,
        commit_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// Memory chunk store with switchable faults
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryChunkStore,
    /// Fail this many upcoming puts with a network error
    failing_puts: AtomicU32,
    /// Fail every call with a network error
    offline: AtomicBool,
    /// Keys that report as missing
    hidden: Mutex<HashSet<ContentHash>>,
}

impl FlakyStore {
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn hide(&self, key: ContentHash) {
        self.hidden.lock().insert(key);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Network("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FlakyStore {
    async fn put(&self, key: &ContentHash, ciphertext: Bytes) -> Result<(), StoreError> {
        self.check_online()?;
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Network("injected put failure".to_string()));
        }
        self.inner.put(key, ciphertext).await
    }

    async fn get(&self, key: &ContentHash) -> Result<Bytes, StoreError> {
        self.check_online()?;
        if self.hidden.lock().contains(key) {
            return Err(StoreError::NotFound(*key));
        }
        self.inner.get(key).await
    }

    async fn exists(&self, key: &ContentHash) -> Result<bool, StoreError> {
        self.check_online()?;
        if self.hidden.lock().contains(key) {
            return Ok(false);
        }
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &ContentHash) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.delete(key).await
    }
}

pub struct TestEnv {
    pub session: Session,
    pub store: Arc<FlakyStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub master: Secret,
}

impl TestEnv {
    pub fn bridge(&self) -> &VirtualFilesystemBridge {
        self.session.bridge()
    }

    /// Another session on the same vault, as if mounted by a second client
    pub async fn second_session(&self, config: MountConfig) -> Session {
        self.session_as(config, Principal::local()).await
    }

    pub async fn session_as(&self, config: MountConfig, principal: Principal) -> Session {
        Session::mount(
            config,
            self.master.clone(),
            self.store.clone(),
            self.catalog.clone(),
            principal,
        )
        .await
        .unwrap()
    }
}

/// Set up a session over a fresh in-memory vault
pub async fn setup_session() -> TestEnv {
    setup_session_with(test_config()).await
}

pub async fn setup_session_with(config: MountConfig) -> TestEnv {
    let store = Arc::new(FlakyStore::default());
    let catalog = Arc::new(MemoryCatalog::new());
    let master = Secret::generate().unwrap();
    let session = Session::mount(
        config,
        master.clone(),
        store.clone(),
        catalog.clone(),
        Principal::local(),
    )
    .await
    .unwrap();
    TestEnv {
        session,
        store,
        catalog,
        master,
    }
}

/// Create (or truncate) `path`, write `data` and close it
pub async fn write_file(bridge: &VirtualFilesystemBridge, path: &str, data: &[u8]) {
    let fh = match bridge.create(path).await {
        Ok(opened) => opened.fh,
        Err(_) => {
            bridge
                .open(path, OpenMode::WRITE.truncating())
                .await
                .unwrap()
                .fh
        }
    };
    bridge.write(fh, 0, data).await.unwrap();
    bridge.release(fh).await.unwrap();
}

pub async fn read_file(bridge: &VirtualFilesystemBridge, path: &str) -> Vec<u8> {
    let opened = bridge.open(path, OpenMode::READ).await.unwrap();
    let data = bridge
        .read(opened.fh, 0, opened.attr.size as u32)
        .await
        .unwrap();
    bridge.release(opened.fh).await.unwrap();
    data.to_vec()
}

/// Deterministic test content that differs between neighbouring blocks
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
}

/// Catalog record of a path, bypassing any session
pub async fn record(catalog: &MemoryCatalog, path: &str) -> ::common::catalog::FileRecord {
    catalog.get_file(path).await.unwrap()
}

/// Poll the sync status of `path` until `done` accepts it
pub async fn wait_for_status(
    bridge: &VirtualFilesystemBridge,
    path: &str,
    done: impl Fn(&::common::sync::FileSyncStatus) -> bool,
) -> ::common::sync::FileSyncStatus {
    for _ in 0..500 {
        let status = bridge.sync_status(path).await.unwrap();
        if done(&status) {
            return status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for sync status of {}", path);
}
