use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::AtomicUsize;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::catalog::FileRecord;
use crate::chunk::{ChunkRef, ContentHash, FileId};
use crate::sync::{CommitNotice, JobId, PendingChunk};

/// A file with at least one open handle, or with local writes that have not
/// been committed yet.
///
/// All handles on the same file share one view, and the view's lock is the
/// per-file lock that serializes writers.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub(crate) id: FileId,
    /// Open handles plus in-progress path operations
    pub(crate) users: AtomicUsize,
    pub(crate) state: RwLock<FileState>,
}

impl OpenFile {
    pub(crate) fn new(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            users: AtomicUsize::new(0),
            state: RwLock::new(FileState::from_record(record)),
        }
    }
}

/// Local view of a file's content
#[derive(Debug, Clone)]
pub(crate) struct FileState {
    pub(crate) path: String,
    /// Committed version the local chunk list is based on
    pub(crate) base_version: u64,
    pub(crate) chunks: Vec<PendingChunk>,
    pub(crate) size: u64,
    pub(crate) modified_at: DateTime<Utc>,
    /// Most recent job staged from this view
    pub(crate) last_job: Option<JobId>,
    /// Most recent commit notice folded into this view
    pub(crate) seen_commit: Option<JobId>,
    pub(crate) dirty: bool,
    pub(crate) removed: bool,
}

impl FileState {
    pub(crate) fn from_record(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            base_version: record.version,
            chunks: record.chunks.iter().cloned().map(PendingChunk::Sealed).collect(),
            size: record.size,
            modified_at: record.modified_at,
            last_job: None,
            seen_commit: None,
            dirty: false,
            removed: false,
        }
    }

    /// Replace the view with a committed record, dropping local changes
    pub(crate) fn reset_to(&mut self, record: &FileRecord) {
        let seen = self.seen_commit;
        *self = Self::from_record(record);
        self.seen_commit = seen;
    }

    /// Whether a clean view lags behind `record`
    pub(crate) fn is_stale(&self, record: &FileRecord) -> bool {
        !self.dirty && record.version > self.base_version
    }

    /// Fold a commit into the view. Returns whether anything changed.
    pub(crate) fn adopt(&mut self, notice: &CommitNotice) -> bool {
        if self.seen_commit == Some(notice.job) {
            return false;
        }
        self.seen_commit = Some(notice.job);
        let ours = self.last_job == Some(notice.job);

        if notice.adopt_remote {
            // newer local writes keep their own job; they get reconciled when it commits
            if ours || self.last_job.is_none() {
                self.reset_to(&notice.record);
                return true;
            }
            return false;
        }

        seal_committed(&mut self.chunks, &notice.record);
        self.base_version = self.base_version.max(notice.record.version);
        if ours {
            self.dirty = false;
            self.modified_at = notice.record.modified_at;
        }
        true
    }
}

/// Swap dirty chunks that `record` has since committed for their sealed refs
pub(crate) fn seal_committed(chunks: &mut [PendingChunk], record: &FileRecord) {
    let committed: HashMap<&ContentHash, &ChunkRef> =
        record.chunks.iter().map(|c| (&c.hash, c)).collect();
    for chunk in chunks.iter_mut() {
        if let PendingChunk::Dirty { hash, .. } = chunk {
            if let Some(sealed) = committed.get(hash) {
                *chunk = PendingChunk::Sealed((*sealed).clone());
            }
        }
    }
}

/// Indices of the blocks covering `[offset, end)`
pub(crate) fn block_range(offset: u64, end: u64, block_size: u64) -> Range<usize> {
    if end <= offset {
        return 0..0;
    }
    (offset / block_size) as usize..end.div_ceil(block_size) as usize
}

/// Byte range within block `index` that overlaps `[offset, end)`
pub(crate) fn overlap(index: usize, offset: u64, end: u64, block_size: u64) -> Range<usize> {
    let start = index as u64 * block_size;
    let from = offset.max(start) - start;
    let to = end.min(start + block_size) - start;
    from as usize..to as usize
}
