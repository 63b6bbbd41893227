//! Mount-scoped state.
//!
//! A [`Session`] owns everything a mounted vault needs: the key manager, the
//! chunk cache, the sync coordinator and the bridge. It is created by
//! [`Session::mount`] and torn down by [`Session::unmount`]; nothing here is
//! global.

use std::sync::Arc;

use crate::auth::{AuthProvider, Principal};
use crate::cache::{CacheStats, LocalCache};
use crate::catalog::{CatalogError, MetadataCatalog, VaultHeader};
use crate::config::MountConfig;
use crate::crypto::{ChunkCodec, Secret, SessionKeyManager};
use crate::error::FsError;
use crate::store::ChunkStore;
use crate::sync::{resolver_for, ChunkIo, RetryPolicy, SyncCoordinator};
use crate::vfs::VirtualFilesystemBridge;

#[derive(Debug)]
pub struct Session {
    config: MountConfig,
    keys: Arc<SessionKeyManager>,
    cache: Arc<LocalCache>,
    coordinator: SyncCoordinator,
    bridge: VirtualFilesystemBridge,
}

impl Session {
    /// Mount a vault for `principal`.
    ///
    /// On first mount a vault key is generated and stored wrapped in the
    /// catalog along with `config.block_size`. Later mounts unwrap it with
    /// `master`; if that fails the mount is refused with [`FsError::Auth`].
    /// The block size recorded with the vault overrides the configured one.
    pub async fn mount(
        mut config: MountConfig,
        master: Secret,
        store: Arc<dyn ChunkStore>,
        catalog: Arc<dyn MetadataCatalog>,
        principal: Principal,
    ) -> Result<Self, FsError> {
        config
            .validate()
            .map_err(|e| FsError::Config(e.to_string()))?;

        let keys = Arc::new(SessionKeyManager::new(master));
        let block_size = match open_vault(&keys, catalog.as_ref(), config.block_size).await {
            Ok(block_size) => block_size,
            Err(e) => {
                keys.release();
                return Err(e);
            }
        };
        if block_size != config.block_size {
            tracing::warn!(
                configured = config.block_size,
                vault = block_size,
                "using the vault's block size"
            );
            config.block_size = block_size;
            if let Err(e) = config.validate() {
                keys.release();
                return Err(FsError::Config(e.to_string()));
            }
        }

        let cache = Arc::new(LocalCache::from_config(&config)?);
        let codec = ChunkCodec::new(config.block_size)?;
        let io = ChunkIo::new(
            store,
            cache.clone(),
            keys.clone(),
            codec,
            RetryPolicy::from_config(&config),
            config.commit_timeout(),
        );
        let coordinator = SyncCoordinator::start(
            catalog.clone(),
            io.clone(),
            resolver_for(config.conflict_policy),
            config.sync_queue_capacity,
        );
        let bridge =
            VirtualFilesystemBridge::new(catalog, io, coordinator.clone(), principal.clone());

        tracing::info!(
            principal = %principal.name,
            block_size = config.block_size,
            cache_max_bytes = config.cache_max_bytes,
            policy = %config.conflict_policy,
            "session mounted"
        );
        Ok(Self {
            config,
            keys,
            cache,
            coordinator,
            bridge,
        })
    }

    /// Validate `token` with `auth` and mount for the resulting principal
    pub async fn mount_with_token(
        config: MountConfig,
        master: Secret,
        store: Arc<dyn ChunkStore>,
        catalog: Arc<dyn MetadataCatalog>,
        auth: &dyn AuthProvider,
        token: &str,
    ) -> Result<Self, FsError> {
        let principal = auth.validate(token).await?;
        Self::mount(config, master, store, catalog, principal).await
    }

    pub fn bridge(&self) -> &VirtualFilesystemBridge {
        &self.bridge
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Short fingerprint of the master key, safe to display
    pub fn key_fingerprint(&self) -> Result<String, FsError> {
        Ok(self.keys.master_fingerprint()?)
    }

    /// Flush pending writes, stop the sync worker and zeroize key material.
    ///
    /// The session is torn down even if the flush fails; the flush error is
    /// returned so the caller knows local changes were not committed.
    pub async fn unmount(self) -> Result<(), FsError> {
        let flushed = self.bridge.flush_all().await;
        self.coordinator.shutdown().await;
        self.keys.release();
        let cache = self.cache.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || cache.sync_disk()).await {
            tracing::warn!(error = %e, "disk cache writes did not finish");
        }
        let stats = self.cache.stats();
        match &flushed {
            Ok(()) => tracing::info!(
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                "session unmounted"
            ),
            Err(e) => tracing::error!(error = %e, "unmounted with uncommitted changes"),
        }
        flushed
    }
}

/// Unseal the vault, creating it on first mount, and return its block size
async fn open_vault(
    keys: &SessionKeyManager,
    catalog: &dyn MetadataCatalog,
    block_size: usize,
) -> Result<usize, FsError> {
    let header = match catalog.load_vault_key().await? {
        Some(header) => header,
        None => {
            let header = VaultHeader {
                wrapped_key: keys.create_vault()?,
                block_size: block_size as u32,
            };
            match catalog.store_vault_key(&header).await {
                Ok(()) => {
                    tracing::info!(block_size, "initialized new vault");
                    return Ok(block_size);
                }
                // another session initialized the vault first
                Err(CatalogError::AlreadyExists(_)) => catalog
                    .load_vault_key()
                    .await?
                    .ok_or_else(|| FsError::Io("vault key vanished".to_string()))?,
                Err(e) => return Err(e.into()),
            }
        }
    };
    keys.unseal_vault(&header.wrapped_key).map_err(|e| {
        tracing::error!(error = %e, "vault key rejected, refusing to mount");
        FsError::Auth(e.to_string())
    })?;
    Ok(header.block_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::store::MemoryChunkStore;
    use crate::vfs::OpenMode;

    fn config() -> MountConfig {
        MountConfig {
            block_size: 512,
            retry_backoff_base_ms: 1,
            retry_backoff_ceiling_ms: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_remount_with_same_master_key() {
        let master = Secret::generate().unwrap();
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let catalog: Arc<dyn MetadataCatalog> = Arc::new(MemoryCatalog::new());

        let session = Session::mount(
            config(),
            master.clone(),
            store.clone(),
            catalog.clone(),
            Principal::local(),
        )
        .await
        .unwrap();
        let opened = session.bridge().create("/hello.txt").await.unwrap();
        session.bridge().write(opened.fh, 0, b"hello").await.unwrap();
        session.bridge().release(opened.fh).await.unwrap();
        session.unmount().await.unwrap();

        let session = Session::mount(config(), master, store, catalog, Principal::local())
            .await
            .unwrap();
        let opened = session
            .bridge()
            .open("/hello.txt", OpenMode::READ)
            .await
            .unwrap();
        let data = session.bridge().read(opened.fh, 0, 100).await.unwrap();
        assert_eq!(&data[..], b"hello");
        session.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_size_is_fixed_by_the_vault() {
        let master = Secret::generate().unwrap();
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let catalog: Arc<dyn MetadataCatalog> = Arc::new(MemoryCatalog::new());

        let session = Session::mount(
            config(),
            master.clone(),
            store.clone(),
            catalog.clone(),
            Principal::local(),
        )
        .await
        .unwrap();
        session.unmount().await.unwrap();

        let mut larger = config();
        larger.block_size = 4096;
        let session = Session::mount(larger, master, store, catalog.clone(), Principal::local())
            .await
            .unwrap();
        assert_eq!(session.config().block_size, 512);
        assert_eq!(session.bridge().block_size(), 512);
        session.unmount().await.unwrap();

        let header = catalog.load_vault_key().await.unwrap().unwrap();
        assert_eq!(header.block_size, 512);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let err = Session::mount(
            MountConfig {
                block_size: 1000,
                ..Default::default()
            },
            Secret::generate().unwrap(),
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MemoryCatalog::new()),
            Principal::local(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
