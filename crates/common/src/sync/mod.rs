//! Reconciles local dirty state with the metadata catalog.
//!
//! Write jobs are staged per file and drained by a background worker; jobs
//! for different files commit in parallel, jobs for one file commit strictly
//! in order. Namespace jobs (create, rename, remove) are committed inline.
//! Every remote call is bounded by a timeout and transient failures are
//! retried with exponential backoff.

use serde::Serialize;

use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::chunk::{ContentHash, FileId};
use crate::crypto::{CodecError, KeyError};
use crate::store::StoreError;

mod conflict;
mod coordinator;
mod io;
mod job;
mod retry;

pub use conflict::{
    resolver_for, Conflict, ConflictAction, ConflictResolver, RejectConflicts, RemoteWinsWithBackup,
    Resolution,
};
pub use coordinator::{CommitNotice, SyncCoordinator};
pub use io::ChunkIo;
pub use job::{Committed, FileSyncStatus, JobId, JobOp, JobState, PendingChunk, SyncJob};
pub use retry::{RetryError, RetryPolicy, Retryable};

/// Coarse classification of a failed job, kept after the error itself is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Integrity,
    Auth,
    NotFound,
    Cancelled,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("version conflict on {file_id}: local changes based on v{local_base}, remote is v{remote_version}")]
    Conflict {
        file_id: FileId,
        local_base: u64,
        remote_version: u64,
    },
    #[error("gave up after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },
    #[error("retries cancelled after {attempts} attempts: {message}")]
    Cancelled { attempts: u32, message: String },
    #[error("{job} failed: {message}")]
    Failed {
        job: JobId,
        kind: FailureKind,
        message: String,
    },
    /// A dirty chunk was committed or dropped before the job could pin it
    #[error("chunk {0} is no longer dirty")]
    StaleChunk(ContentHash),
    #[error("plaintext for dirty chunk {0} is missing from the cache")]
    MissingPlaintext(ContentHash),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("{job} cannot be retried in state {state}")]
    InvalidState { job: JobId, state: String },
    #[error("no conflict pending for {0}")]
    NoConflict(FileId),
    #[error("only write jobs can be staged")]
    NotAWrite,
    #[error("sync coordinator is shut down")]
    ShutDown,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Catalog(e) => e.is_retryable(),
            SyncError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl SyncError {
    pub(crate) fn from_retry(err: RetryError<SyncError>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, last } => SyncError::Network {
                attempts,
                message: last.to_string(),
            },
            RetryError::Cancelled { attempts, last } => SyncError::Cancelled {
                attempts,
                message: last.to_string(),
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Network { .. } => FailureKind::Network,
            SyncError::Cancelled { .. } => FailureKind::Cancelled,
            SyncError::Failed { kind, .. } => *kind,
            SyncError::Codec(CodecError::Integrity { .. }) => FailureKind::Integrity,
            SyncError::Key(_) => FailureKind::Auth,
            SyncError::Store(StoreError::NotFound(_)) => FailureKind::NotFound,
            SyncError::Catalog(CatalogError::NotFound(_)) => FailureKind::NotFound,
            SyncError::Store(e) if e.is_retryable() => FailureKind::Network,
            SyncError::Catalog(e) if e.is_retryable() => FailureKind::Network,
            _ => FailureKind::Other,
        }
    }
}
