//! Durable backends for VaultFS
//!
//! This crate provides the storage collaborators a mounted session talks to:
//!
//! - [`ObjectChunkStore`]: a content-addressed ciphertext store over pluggable
//!   object storage (S3/MinIO/local filesystem/memory)
//! - [`SqliteCatalog`]: the versioned metadata catalog in SQLite, with
//!   optimistic version checks and atomic renames
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vaultfs_object_store::{ChunkStoreConfig, ObjectChunkStore, SqliteCatalog};
//!
//! # async fn example() -> Result<(), vaultfs_object_store::BackendError> {
//! let store = ObjectChunkStore::new(ChunkStoreConfig::Local {
//!     path: "/tmp/vault/chunks".into(),
//! })
//! .await?;
//! let catalog = SqliteCatalog::open(Path::new("/tmp/vault/catalog.sqlite")).await?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod database;
mod error;
mod storage;

pub use catalog::SqliteCatalog;
pub use error::{BackendError, Result};
pub use storage::{ChunkStoreConfig, ObjectChunkStore};
