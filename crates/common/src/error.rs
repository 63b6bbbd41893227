//! Errors at the filesystem operation boundary.
//!
//! Every lower-level error converts into an [`FsError`], which in turn maps
//! onto a POSIX errno for the mount adapter.

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::crypto::{CodecError, KeyError};
use crate::store::StoreError;
use crate::sync::{FailureKind, SyncError};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Credential or key failure. The session should be unmounted.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Corrupted or tampered data. Never retried.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// Transient remote failure that outlived its retries
    #[error("network error: {0}")]
    Network(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Too much uncommitted data is staged; flush and try again
    #[error("cache exhausted: {0}")]
    CacheExhausted(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("bad file handle: {0}")]
    BadHandle(u64),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FsError {
    /// POSIX error code for this error
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) | FsError::Auth(_) => libc::EACCES,
            FsError::Integrity(_) | FsError::Network(_) | FsError::Io(_) => libc::EIO,
            FsError::Conflict(_) | FsError::CacheExhausted(_) => libc::EAGAIN,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidPath(_) | FsError::Config(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
        }
    }
}

impl From<CatalogError> for FsError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(p) => FsError::NotFound(p),
            CatalogError::AlreadyExists(p) => FsError::AlreadyExists(p),
            e @ CatalogError::Conflict { .. } => FsError::Conflict(e.to_string()),
            CatalogError::NotADirectory(p) => FsError::NotADirectory(p),
            CatalogError::IsADirectory(p) => FsError::IsADirectory(p),
            CatalogError::DirectoryNotEmpty(p) => FsError::DirectoryNotEmpty(p),
            CatalogError::InvalidPath(p) => FsError::InvalidPath(p),
            e @ (CatalogError::Network(_) | CatalogError::Timeout) => {
                FsError::Network(e.to_string())
            }
            CatalogError::Backend(msg) => FsError::Io(msg),
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => FsError::NotFound(format!("chunk {}", key.short())),
            e @ (StoreError::Network(_) | StoreError::Timeout) => FsError::Network(e.to_string()),
            e => FsError::Io(e.to_string()),
        }
    }
}

impl From<CodecError> for FsError {
    fn from(err: CodecError) -> Self {
        match err {
            e @ CodecError::Integrity { .. } => FsError::Integrity(e.to_string()),
            e => FsError::Io(e.to_string()),
        }
    }
}

impl From<KeyError> for FsError {
    fn from(err: KeyError) -> Self {
        FsError::Auth(err.to_string())
    }
}

impl From<AuthError> for FsError {
    fn from(err: AuthError) -> Self {
        FsError::Auth(err.to_string())
    }
}

impl From<CacheError> for FsError {
    fn from(err: CacheError) -> Self {
        match err {
            e @ CacheError::Exhausted { .. } => FsError::CacheExhausted(e.to_string()),
            e => FsError::Io(e.to_string()),
        }
    }
}

impl From<SyncError> for FsError {
    fn from(err: SyncError) -> Self {
        match err {
            e @ SyncError::Conflict { .. } => FsError::Conflict(e.to_string()),
            e @ SyncError::Network { .. } => FsError::Network(e.to_string()),
            SyncError::Failed { kind, message, .. } => match kind {
                FailureKind::Network => FsError::Network(message),
                FailureKind::Integrity => FsError::Integrity(message),
                FailureKind::Auth => FsError::Auth(message),
                FailureKind::NotFound => FsError::NotFound(message),
                FailureKind::Cancelled | FailureKind::Other => FsError::Io(message),
            },
            SyncError::Catalog(e) => e.into(),
            SyncError::Store(e) => e.into(),
            SyncError::Codec(e) => e.into(),
            SyncError::Key(e) => e.into(),
            SyncError::Cache(e) => e.into(),
            e => FsError::Io(e.to_string()),
        }
    }
}
