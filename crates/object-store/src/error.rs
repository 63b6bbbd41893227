//! Error types for the durable backends.

use std::path::PathBuf;

use common::catalog::CatalogError;
use common::store::StoreError;

/// Errors raised while opening or talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be decoded
    #[error("corrupt catalog row: {0}")]
    Corrupt(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Path error
    #[error("path error: {0}")]
    Path(PathBuf),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before mounting.")]
    BucketNotFound(String),
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ObjectStore(e) => store_error(e),
            BackendError::InvalidConfig(msg) => StoreError::InvalidConfig(msg),
            e => StoreError::Backend(e.to_string()),
        }
    }
}

/// Classify an object store failure. Only errors that can clear up on their
/// own are reported as network errors.
pub(crate) fn store_error(err: object_store::Error) -> StoreError {
    match err {
        e @ object_store::Error::Generic { .. } => StoreError::Network(e.to_string()),
        e => StoreError::Backend(e.to_string()),
    }
}

impl From<BackendError> for CatalogError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Database(e) => catalog_error(e),
            e => CatalogError::Backend(e.to_string()),
        }
    }
}

pub(crate) fn catalog_error(err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::PoolTimedOut => CatalogError::Timeout,
        sqlx::Error::Io(e) => CatalogError::Network(e.to_string()),
        sqlx::Error::PoolClosed => CatalogError::Network("connection pool closed".to_string()),
        e => CatalogError::Backend(e.to_string()),
    }
}
