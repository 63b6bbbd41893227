use std::fmt;

use serde::Serialize;

use crate::catalog::{EntryKind, FileRecord};
use super::FailureKind;
use crate::chunk::{ChunkRef, ContentHash, FileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One entry of a file's local chunk list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChunk {
    /// Already committed and stored
    Sealed(ChunkRef),
    /// Plaintext held dirty in the local cache, not yet encrypted
    Dirty { hash: ContentHash, len: u32 },
}

impl PendingChunk {
    pub fn hash(&self) -> &ContentHash {
        match self {
            PendingChunk::Sealed(chunk) => &chunk.hash,
            PendingChunk::Dirty { hash, .. } => hash,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            PendingChunk::Sealed(chunk) => chunk.len,
            PendingChunk::Dirty { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, PendingChunk::Dirty { .. })
    }
}

/// The mutation a job applies to the catalog
#[derive(Debug, Clone)]
pub enum JobOp {
    /// Replace a file's chunk list, conditioned on `base_version`
    Write {
        file_id: FileId,
        base_version: u64,
        chunks: Vec<PendingChunk>,
    },
    Create { kind: EntryKind },
    Rename { to: String },
    Remove { kind: EntryKind },
}

/// A pending local mutation
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub(crate) id: JobId,
    pub path: String,
    pub op: JobOp,
}

impl SyncJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn file_id(&self) -> Option<FileId> {
        match &self.op {
            JobOp::Write { file_id, .. } => Some(*file_id),
            _ => None,
        }
    }

    pub fn base_version(&self) -> Option<u64> {
        match &self.op {
            JobOp::Write { base_version, .. } => Some(*base_version),
            _ => None,
        }
    }

    /// Distinct dirty chunk hashes this job needs from the cache
    pub fn dirty_hashes(&self) -> Vec<ContentHash> {
        let mut hashes = Vec::new();
        if let JobOp::Write { chunks, .. } = &self.op {
            for chunk in chunks {
                if let PendingChunk::Dirty { hash, .. } = chunk {
                    if !hashes.contains(hash) {
                        hashes.push(*hash);
                    }
                }
            }
        }
        hashes
    }

    pub(crate) fn set_base_version(&mut self, version: u64) {
        if let JobOp::Write { base_version, .. } = &mut self.op {
            *base_version = version;
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.op {
            JobOp::Write { .. } => "write",
            JobOp::Create { .. } => "create",
            JobOp::Rename { .. } => "rename",
            JobOp::Remove { .. } => "remove",
        }
    }
}

/// Lifecycle of a job.
///
/// `Staged -> Committing -> {Committed | Conflicted | Failed}`. Conflicted and
/// failed jobs go back to `Staged` only through caller-driven resolution or
/// retry. Committed is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Staged,
    Committing,
    Committed { version: u64 },
    Conflicted { local_base: u64, remote_version: u64 },
    Failed {
        attempts: u32,
        kind: FailureKind,
        error: String,
    },
    /// Folded into a newer job for the same file before it was committed
    Superseded { by: JobId },
    /// Dropped before committing (file removed or local changes discarded)
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Committed { .. } | JobState::Superseded { .. } | JobState::Cancelled
        )
    }
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct Committed {
    pub job: JobId,
    /// The record as it stands after the commit
    pub record: FileRecord,
    /// Side copy holding local changes that lost a conflict
    pub side_copy: Option<FileRecord>,
    /// File replaced at a rename destination
    pub replaced: Option<FileRecord>,
}

impl Committed {
    pub fn version(&self) -> u64 {
        self.record.version
    }
}

/// Sync status of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileSyncStatus {
    /// Nothing pending
    Clean,
    Pending { job: JobId },
    Committing { job: JobId },
    Conflicted {
        job: JobId,
        local_base: u64,
        remote_version: u64,
    },
    Failed { job: JobId, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_hashes_are_distinct() {
        let a = ContentHash::of(b"a");
        let job = SyncJob {
            id: JobId(1),
            path: "/f".to_string(),
            op: JobOp::Write {
                file_id: FileId::new(),
                base_version: 1,
                chunks: vec![
                    PendingChunk::Dirty { hash: a, len: 1 },
                    PendingChunk::Dirty { hash: a, len: 1 },
                ],
            },
        };
        assert_eq!(job.dirty_hashes(), vec![a]);
        assert_eq!(job.kind(), "write");
    }
}
