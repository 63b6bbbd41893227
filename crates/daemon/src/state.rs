use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::auth::{AuthProvider, Principal, StaticTokenProvider, TokenEntry};
use common::catalog::MetadataCatalog;
use common::config::MountConfig;
use common::crypto::Secret;
use common::error::FsError;
use common::session::Session;
use common::store::ChunkStore;
use object_store::{BackendError, ChunkStoreConfig, ObjectChunkStore, SqliteCatalog};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "vaultfs";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CATALOG_FILE_NAME: &str = "catalog.sqlite";
pub const KEY_FILE_NAME: &str = "master.key";
pub const CHUNKS_DIR_NAME: &str = "chunks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log directive, overridable with RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily log files (stderr only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// SQLite catalog location (defaults to the vault directory)
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Where ciphertext chunks live
    #[serde(default)]
    pub chunk_store: ChunkStoreConfig,
    #[serde(default)]
    pub mount: MountConfig,
    /// Accepted bearer tokens; `--token` is checked against these
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            catalog_path: None,
            chunk_store: ChunkStoreConfig::default(),
            mount: MountConfig::default(),
            tokens: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> Result<tracing::Level, StateError> {
        self.log_level
            .parse()
            .map_err(|_| StateError::InvalidLogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the vault directory (~/.vaultfs)
    pub vault_dir: PathBuf,
    /// Path to the SQLite catalog
    pub catalog_path: PathBuf,
    /// Path to the master key file
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the vault directory path (custom or default ~/.vaultfs)
    pub fn vault_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new vault directory.
    ///
    /// Without an explicit config, chunks are stored on the local filesystem
    /// under `chunks/`.
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        if vault_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&vault_dir)?;

        let config = config.unwrap_or_else(|| AppConfig {
            chunk_store: ChunkStoreConfig::Local {
                path: vault_dir.join(CHUNKS_DIR_NAME),
            },
            ..Default::default()
        });
        config
            .mount
            .validate()
            .map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        config.log_level()?;

        let key_path = vault_dir.join(KEY_FILE_NAME);
        let master = Secret::generate().map_err(|e| StateError::InvalidKey(e.to_string()))?;
        write_key_file(&key_path, master.bytes())?;

        let config_path = vault_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        let catalog_path = config
            .catalog_path
            .clone()
            .unwrap_or_else(|| vault_dir.join(CATALOG_FILE_NAME));

        tracing::info!(vault_dir = %vault_dir.display(), "vault directory initialized");
        Ok(Self {
            vault_dir,
            catalog_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the vault directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        let config_path = vault_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = vault_dir.join(KEY_FILE_NAME);
        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        let catalog_path = config
            .catalog_path
            .clone()
            .unwrap_or_else(|| vault_dir.join(CATALOG_FILE_NAME));

        Ok(Self {
            vault_dir,
            catalog_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load the master key from the key file
    pub fn load_key(&self) -> Result<Secret, StateError> {
        let bytes = fs::read(&self.key_path)?;
        Secret::from_slice(&bytes).map_err(|e| StateError::InvalidKey(e.to_string()))
    }

    /// Open the configured backends and mount a session.
    ///
    /// With a token the principal comes from the `[[tokens]]` table,
    /// otherwise the session runs as the local full-access principal.
    pub async fn open_session(&self, token: Option<&str>) -> Result<Session, StateError> {
        let master = self.load_key()?;
        let store: Arc<dyn ChunkStore> =
            Arc::new(ObjectChunkStore::new(self.config.chunk_store.clone()).await?);
        let catalog: Arc<dyn MetadataCatalog> =
            Arc::new(SqliteCatalog::open(&self.catalog_path).await?);

        let principal = match token {
            Some(token) => {
                let provider = StaticTokenProvider::new(self.config.tokens.iter().cloned());
                provider.validate(token).await.map_err(FsError::from)?
            }
            None => Principal::local(),
        };

        let session =
            Session::mount(self.config.mount.clone(), master, store, catalog, principal).await?;
        Ok(session)
    }
}

/// Write key bytes readable by the owner only
fn write_key_file(path: &Path, key: &[u8]) -> Result<(), StateError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key)?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("vault directory not initialized. Run 'vaultfs init' first")]
    NotInitialized,

    #[error("vault directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
