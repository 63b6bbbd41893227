use std::path::PathBuf;

use clap::Args;

use common::config::{ConflictPolicy, MountConfig};
use object_store::ChunkStoreConfig;
use vaultfs_daemon::state::{AppConfig, AppState, StateError, CHUNKS_DIR_NAME};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Chunk size in bytes (power of two)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// In-memory cache budget in bytes
    #[arg(long)]
    pub cache_max_bytes: Option<u64>,

    /// What to do when a commit loses to a concurrent writer
    /// (reject | remote-wins-with-backup)
    #[arg(long)]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Directory for the ciphertext chunks (defaults to <config>/chunks)
    #[arg(long)]
    pub chunks_dir: Option<PathBuf>,

    /// Directory for daily log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let vault_dir = AppState::vault_dir(ctx.config_path.clone())?;
        let defaults = MountConfig::default();
        let mount = MountConfig {
            block_size: self.block_size.unwrap_or(defaults.block_size),
            cache_max_bytes: self.cache_max_bytes.unwrap_or(defaults.cache_max_bytes),
            conflict_policy: self.conflict_policy.unwrap_or(defaults.conflict_policy),
            ..defaults
        };
        let config = AppConfig {
            log_dir: self.log_dir.clone(),
            chunk_store: ChunkStoreConfig::Local {
                path: self
                    .chunks_dir
                    .clone()
                    .unwrap_or_else(|| vault_dir.join(CHUNKS_DIR_NAME)),
            },
            mount,
            ..Default::default()
        };

        let state = AppState::init(Some(vault_dir), Some(config))?;

        // Mounting once creates the catalog and seals a fresh vault key
        let session = state.open_session(None).await?;
        let fingerprint = session.key_fingerprint().map_err(StateError::from)?;
        session.unmount().await.map_err(StateError::from)?;

        let output = format!(
            "Initialized vault at: {}\n\
             - Catalog: {}\n\
             - Master key: {} (fingerprint {})\n\
             - Chunks: {}\n\
             - Config: {}\n\
             - Block size: {} bytes\n\
             - Conflict policy: {}",
            state.vault_dir.display(),
            state.catalog_path.display(),
            state.key_path.display(),
            fingerprint,
            state.config.chunk_store,
            state.config_path.display(),
            state.config.mount.block_size,
            state.config.mount.conflict_policy,
        );

        Ok(output)
    }
}
