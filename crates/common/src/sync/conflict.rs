//! Conflict handling for commits that lose the optimistic-concurrency race
//!
//! A conflict happens when a write job's base version is no longer the
//! catalog's current version because another session committed first. The
//! configured [`ConflictPolicy`] picks a resolver:
//!
//! - **[`RejectConflicts`]** (default): surface the conflict and keep local
//!   changes dirty until the caller resolves it
//! - **[`RemoteWinsWithBackup`]**: adopt the remote version and commit local
//!   changes as a side copy named `<stem>.conflict-v<n>-<id>.<ext>`

use crate::catalog::{join, split_parent, CatalogError};
use crate::chunk::FileId;
use crate::config::ConflictPolicy;

/// A detected version conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub file_id: FileId,
    /// Current path of the remote record
    pub path: String,
    /// Version the local changes were built on
    pub local_base: u64,
    pub remote_version: u64,
}

/// What the coordinator should do with a conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Park the job and report the conflict
    Surface,
    /// Commit the local state as a new file at `side_path` and adopt the
    /// remote version at the original path
    BackupLocal { side_path: String },
}

/// Caller-driven resolution of a surfaced conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Re-stage local changes on top of the remote version, overwriting it
    KeepLocal,
    /// Drop local changes and reload the remote version
    DiscardLocal,
}

pub trait ConflictResolver: std::fmt::Debug + Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Result<ConflictAction, CatalogError>;
}

pub fn resolver_for(policy: ConflictPolicy) -> Box<dyn ConflictResolver> {
    match policy {
        ConflictPolicy::Reject => Box::new(RejectConflicts),
        ConflictPolicy::RemoteWinsWithBackup => Box::new(RemoteWinsWithBackup),
    }
}

/// Never resolves automatically
#[derive(Debug, Clone, Default)]
pub struct RejectConflicts;

impl ConflictResolver for RejectConflicts {
    fn resolve(&self, _conflict: &Conflict) -> Result<ConflictAction, CatalogError> {
        Ok(ConflictAction::Surface)
    }
}

/// Remote wins, local changes survive in a side copy
///
/// If `report.txt` at local base 3 conflicts, local changes land in
/// `report.conflict-v4-1a2b3c4d.txt` next to it.
#[derive(Debug, Clone, Default)]
pub struct RemoteWinsWithBackup;

impl RemoteWinsWithBackup {
    /// Side copy path for local changes that would have become version
    /// `local_base + 1`
    pub fn conflict_path(path: &str, local_base: u64, file_id: &FileId) -> Result<String, CatalogError> {
        let (parent, name) = split_parent(path)?;
        let short_id = &file_id.as_uuid().simple().to_string()[..8];
        let version = local_base + 1;

        // dotfiles like `.env` have no extension
        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
            _ => (name.as_str(), None),
        };
        let side_name = match ext {
            Some(ext) => format!("{}.conflict-v{}-{}.{}", stem, version, short_id, ext),
            None => format!("{}.conflict-v{}-{}", stem, version, short_id),
        };
        Ok(join(&parent, &side_name))
    }
}

impl ConflictResolver for RemoteWinsWithBackup {
    fn resolve(&self, conflict: &Conflict) -> Result<ConflictAction, CatalogError> {
        let side_path = Self::conflict_path(&conflict.path, conflict.local_base, &conflict.file_id)?;
        Ok(ConflictAction::BackupLocal { side_path })
    }
}
