//! Versioned metadata for files and directories.
//!
//! Entries form a flat arena keyed by [`FileId`]. Each entry points at its
//! parent by id; there are no owning parent/child references, so a path is
//! resolved by walking names from the root. Updates to file content are
//! conditioned on the caller's expected version (optimistic concurrency):
//! the catalog is the only arbiter of write ordering between sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkRef, ContentHash, FileId};

mod memory;
mod path;

pub use memory::MemoryCatalog;
pub use path::{file_name, join, normalize, split_parent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "directory" => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// A committed catalog entry at a specific version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub parent: FileId,
    pub name: String,
    /// Absolute, normalized path at the time the record was read
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub content_hash: ContentHash,
    pub version: u64,
    pub chunks: Vec<ChunkRef>,
    pub modified_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub id: FileId,
    pub kind: EntryKind,
    pub size: u64,
    pub version: u64,
}

/// Summary of a historical version of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub size: u64,
    pub content_hash: ContentHash,
    pub modified_at: DateTime<Utc>,
}

/// Result of a rename
#[derive(Debug, Clone)]
pub struct Renamed {
    pub record: FileRecord,
    /// The file that previously lived at the destination, if one was replaced
    pub replaced: Option<FileRecord>,
}

/// Vault-wide parameters fixed when the vault is initialised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHeader {
    /// Vault key wrapped under the master key
    pub wrapped_key: Vec<u8>,
    /// Block size every file in the vault is chunked with
    pub block_size: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The stored version moved past the caller's expected base version
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: FileId,
        expected: u64,
        actual: u64,
    },
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out")]
    Timeout,
    #[error("catalog error: {0}")]
    Backend(String),
}

impl CatalogError {
    /// Whether a caller may retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Network(_) | CatalogError::Timeout)
    }
}

/// Size and content hash implied by an ordered chunk list
pub fn summarize(chunks: &[ChunkRef]) -> (u64, ContentHash) {
    let size = chunks.iter().map(|c| c.len as u64).sum();
    (size, ContentHash::of_chunks(chunks.iter().map(|c| &c.hash), size))
}

#[async_trait]
pub trait MetadataCatalog: Send + Sync + std::fmt::Debug + 'static {
    /// Resolve a path to its current record.
    async fn get_file(&self, path: &str) -> Result<FileRecord, CatalogError>;

    async fn get_by_id(&self, id: &FileId) -> Result<FileRecord, CatalogError>;

    /// Create a file at version 1 with the given chunk list.
    ///
    /// The parent directory must exist and the name must be free.
    async fn create_file(
        &self,
        path: &str,
        chunks: Vec<ChunkRef>,
    ) -> Result<FileRecord, CatalogError>;

    async fn create_dir(&self, path: &str) -> Result<FileRecord, CatalogError>;

    /// Replace a file's chunk list, conditioned on its current version.
    ///
    /// Fails with [`CatalogError::Conflict`] when the stored version is not
    /// `expected_version`. On success the returned record carries
    /// `expected_version + 1`.
    async fn update_file(
        &self,
        id: &FileId,
        expected_version: u64,
        chunks: Vec<ChunkRef>,
    ) -> Result<FileRecord, CatalogError>;

    /// List a directory, sorted by name.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, CatalogError>;

    /// Atomically move an entry.
    ///
    /// Concurrent readers observe either the old path or the new one, never
    /// both and never neither. A file destination is replaced; a directory
    /// destination fails with [`CatalogError::AlreadyExists`].
    async fn rename(&self, from: &str, to: &str) -> Result<Renamed, CatalogError>;

    /// Delete an entry of the given kind. Directories must be empty.
    async fn remove(&self, path: &str, kind: EntryKind) -> Result<FileRecord, CatalogError>;

    /// Whether any live record or retained version references a stored chunk
    async fn chunk_in_use(&self, storage_key: &ContentHash) -> Result<bool, CatalogError>;

    /// Version history of a file, oldest first
    async fn versions(&self, id: &FileId) -> Result<Vec<VersionInfo>, CatalogError>;

    /// The wrapped vault key and block size, if the vault is initialised
    async fn load_vault_key(&self) -> Result<Option<VaultHeader>, CatalogError>;

    /// Persist the vault header. Fails if one is already stored.
    async fn store_vault_key(&self, header: &VaultHeader) -> Result<(), CatalogError>;
}
