use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{DirEntry, EntryKind, FileRecord};
use crate::chunk::{ContentHash, FileId};

/// Attributes of a file or directory as seen through the bridge.
///
/// For files with uncommitted local writes, `size` reflects the local view
/// and `dirty` is set; `version` is always the last committed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttr {
    pub id: FileId,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub version: u64,
    pub content_hash: ContentHash,
    pub modified_at: DateTime<Utc>,
    pub dirty: bool,
}

impl FileAttr {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Number of `block_size` blocks needed to hold the file
    pub fn blocks(&self, block_size: u64) -> u64 {
        self.size.div_ceil(block_size.max(1))
    }
}

impl From<&FileRecord> for FileAttr {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            kind: record.kind,
            size: record.size,
            version: record.version,
            content_hash: record.content_hash,
            modified_at: record.modified_at,
            dirty: false,
        }
    }
}

/// One row of a bridge directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirListing {
    pub name: String,
    pub id: FileId,
    pub kind: EntryKind,
    pub size: u64,
    pub version: u64,
    pub dirty: bool,
}

impl From<DirEntry> for DirListing {
    fn from(entry: DirEntry) -> Self {
        Self {
            name: entry.name,
            id: entry.id,
            kind: entry.kind,
            size: entry.size,
            version: entry.version,
            dirty: false,
        }
    }
}
