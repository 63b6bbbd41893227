use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinHandle, JoinSet};

use super::conflict::{Conflict, ConflictAction, ConflictResolver, Resolution};
use super::io::ChunkIo;
use super::job::{Committed, FileSyncStatus, JobId, JobOp, JobState, PendingChunk, SyncJob};
use super::SyncError;
use crate::catalog::{CatalogError, EntryKind, FileRecord, MetadataCatalog};
use crate::chunk::{ChunkRef, ContentHash, FileId};
use crate::crypto::Secret;

/// The most recent commit for a file, published for open handles to adopt
#[derive(Debug, Clone)]
pub struct CommitNotice {
    pub job: JobId,
    pub record: FileRecord,
    /// Local changes lost a conflict and were saved elsewhere; the handle
    /// must replace its view with `record`
    pub adopt_remote: bool,
}

/// Per-file sync state
#[derive(Debug, Default)]
struct Lane {
    /// Latest write job not yet picked up by a committer
    staged: Option<SyncJob>,
    /// Job currently being committed
    committing: Option<(JobId, u64)>,
    /// Set while a surfaced conflict waits for the caller
    conflict: Option<Conflict>,
    /// Stop retrying after the current attempt
    cancelled: bool,
    last_commit: Option<CommitNotice>,
}

#[derive(Debug, Default)]
struct SyncState {
    lanes: HashMap<FileId, Lane>,
    jobs: HashMap<JobId, JobState>,
}

struct CoordinatorInner {
    catalog: Arc<dyn MetadataCatalog>,
    io: ChunkIo,
    resolver: Box<dyn ConflictResolver>,
    state: Mutex<SyncState>,
    next_job: AtomicU64,
    queue: flume::Sender<FileId>,
    shutting_down: AtomicBool,
    shutdown: Notify,
    /// Bumped on every lane change; waiters re-check their lane
    changed: watch::Sender<u64>,
}

/// Stages, commits and tracks sync jobs for one session.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("resolver", &self.inner.resolver)
            .field(
                "shutting_down",
                &self.inner.shutting_down.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl SyncCoordinator {
    /// Create a coordinator and spawn its background worker on the current
    /// tokio runtime.
    pub fn start(
        catalog: Arc<dyn MetadataCatalog>,
        io: ChunkIo,
        resolver: Box<dyn ConflictResolver>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = flume::bounded(queue_capacity.max(1));
        let (changed, _) = watch::channel(0u64);
        let inner = Arc::new(CoordinatorInner {
            catalog,
            io,
            resolver,
            state: Mutex::new(SyncState::default()),
            next_job: AtomicU64::new(1),
            queue: tx,
            shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
            changed,
        });
        let worker = tokio::spawn(run_worker(inner.clone(), rx));
        Self {
            inner,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    fn job(&self, path: &str, op: JobOp) -> SyncJob {
        SyncJob {
            id: JobId(self.inner.next_job.fetch_add(1, Ordering::Relaxed)),
            path: path.to_string(),
            op,
        }
    }

    pub fn write_job(
        &self,
        file_id: FileId,
        path: &str,
        base_version: u64,
        chunks: Vec<PendingChunk>,
    ) -> SyncJob {
        self.job(
            path,
            JobOp::Write {
                file_id,
                base_version,
                chunks,
            },
        )
    }

    pub fn create_job(&self, path: &str, kind: EntryKind) -> SyncJob {
        self.job(path, JobOp::Create { kind })
    }

    pub fn rename_job(&self, from: &str, to: &str) -> SyncJob {
        self.job(from, JobOp::Rename { to: to.to_string() })
    }

    pub fn remove_job(&self, path: &str, kind: EntryKind) -> SyncJob {
        self.job(path, JobOp::Remove { kind })
    }

    /// Queue a write job for its file.
    ///
    /// The job pins its dirty chunks in the cache. A job already staged for
    /// the same file is superseded: the new job inherits its base version and
    /// the old job's pins are released.
    pub async fn stage(&self, job: SyncJob) -> Result<JobId, SyncError> {
        let file_id = job.file_id().ok_or(SyncError::NotAWrite)?;
        let id = job.id;
        let parked = self.inner.stage_locked(file_id, job)?;
        self.inner.notify();
        if !parked {
            self.inner
                .queue
                .send_async(file_id)
                .await
                .map_err(|_| SyncError::ShutDown)?;
        }
        Ok(id)
    }

    /// Commit a job and wait for the outcome.
    ///
    /// Write jobs go through the file's lane (and so are ordered after any
    /// pending write for that file); namespace jobs are applied directly.
    pub async fn commit(&self, job: SyncJob) -> Result<Committed, SyncError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(SyncError::ShutDown);
        }
        match job.op.clone() {
            JobOp::Write { file_id, .. } => {
                let id = self.stage(job).await?;
                self.wait_for(file_id, id).await
            }
            JobOp::Create { kind } => {
                let inner = &*self.inner;
                let path = job.path.as_str();
                let record = inner
                    .with_retry(None, move || async move {
                        match kind {
                            EntryKind::File => {
                                inner
                                    .io
                                    .catalog_call(inner.catalog.create_file(path, Vec::new()))
                                    .await
                            }
                            EntryKind::Directory => {
                                inner.io.catalog_call(inner.catalog.create_dir(path)).await
                            }
                        }
                    })
                    .await?;
                tracing::debug!(path = %record.path, id = %record.id, kind = kind.as_str(), "created entry");
                Ok(Committed {
                    job: job.id,
                    record,
                    side_copy: None,
                    replaced: None,
                })
            }
            JobOp::Rename { to } => {
                let renamed = self
                    .inner
                    .with_retry(None, || {
                        self.inner
                            .io
                            .catalog_call(self.inner.catalog.rename(&job.path, &to))
                    })
                    .await?;
                tracing::debug!(from = %job.path, to = %renamed.record.path, "renamed entry");
                Ok(Committed {
                    job: job.id,
                    record: renamed.record,
                    side_copy: None,
                    replaced: renamed.replaced,
                })
            }
            JobOp::Remove { kind } => {
                let record = self
                    .inner
                    .with_retry(None, || {
                        self.inner
                            .io
                            .catalog_call(self.inner.catalog.remove(&job.path, kind))
                    })
                    .await?;
                self.forget(&record.id);
                tracing::debug!(path = %record.path, id = %record.id, "removed entry");
                Ok(Committed {
                    job: job.id,
                    record,
                    side_copy: None,
                    replaced: None,
                })
            }
        }
    }

    /// Wait until `job` (or the job that superseded it) reaches an outcome.
    async fn wait_for(&self, file_id: FileId, job: JobId) -> Result<Committed, SyncError> {
        let mut current = job;
        let mut rx = self.inner.changed.subscribe();
        loop {
            {
                let state = self.inner.state.lock();
                let lane = state.lanes.get(&file_id);
                match state.jobs.get(&current) {
                    None => return Err(SyncError::UnknownJob(current)),
                    Some(JobState::Superseded { by }) => {
                        current = *by;
                        continue;
                    }
                    Some(JobState::Committed { .. }) => {
                        let notice = lane
                            .and_then(|l| l.last_commit.clone())
                            .filter(|n| n.job == current);
                        if let Some(notice) = notice {
                            return Ok(Committed {
                                job: current,
                                record: notice.record,
                                side_copy: None,
                                replaced: None,
                            });
                        }
                        // a newer commit replaced the notice; report the latest record
                        if let Some(notice) = lane.and_then(|l| l.last_commit.clone()) {
                            return Ok(Committed {
                                job: current,
                                record: notice.record,
                                side_copy: None,
                                replaced: None,
                            });
                        }
                        return Err(SyncError::UnknownJob(current));
                    }
                    Some(JobState::Conflicted {
                        local_base,
                        remote_version,
                    }) => {
                        return Err(SyncError::Conflict {
                            file_id,
                            local_base: *local_base,
                            remote_version: *remote_version,
                        })
                    }
                    Some(JobState::Failed { kind, error, .. }) => {
                        return Err(SyncError::Failed {
                            job: current,
                            kind: *kind,
                            message: error.clone(),
                        });
                    }
                    Some(JobState::Cancelled) => {
                        return Err(SyncError::Cancelled {
                            attempts: 0,
                            message: format!("{} was cancelled", current),
                        })
                    }
                    Some(JobState::Staged) | Some(JobState::Committing) => {}
                }
            }
            if self.inner.shutting_down.load(Ordering::Acquire) && self.worker_finished() {
                return Err(SyncError::ShutDown);
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::ShutDown);
            }
        }
    }

    /// Commit everything pending for a file and wait for the result.
    ///
    /// A previously failed job is retried. Returns the latest commit notice,
    /// if the file was ever committed through this coordinator.
    pub async fn flush_file(&self, file_id: &FileId) -> Result<Option<CommitNotice>, SyncError> {
        let rearmed = {
            let mut state = self.inner.state.lock();
            let SyncState { lanes, jobs } = &mut *state;
            match lanes.get_mut(file_id) {
                Some(lane) if lane.conflict.is_none() => match &lane.staged {
                    Some(job) if matches!(jobs.get(&job.id), Some(JobState::Failed { .. })) => {
                        jobs.insert(job.id, JobState::Staged);
                        lane.cancelled = false;
                        true
                    }
                    _ => false,
                },
                _ => false,
            }
        };
        if rearmed {
            self.inner.notify();
            self.inner
                .queue
                .send_async(*file_id)
                .await
                .map_err(|_| SyncError::ShutDown)?;
        }

        let mut rx = self.inner.changed.subscribe();
        loop {
            {
                let state = self.inner.state.lock();
                let Some(lane) = state.lanes.get(file_id) else {
                    return Ok(None);
                };
                if let Some(conflict) = &lane.conflict {
                    return Err(SyncError::Conflict {
                        file_id: *file_id,
                        local_base: conflict.local_base,
                        remote_version: conflict.remote_version,
                    });
                }
                let staged_state = lane
                    .staged
                    .as_ref()
                    .map(|job| (job.id, state.jobs.get(&job.id).cloned()));
                match staged_state {
                    Some((job, Some(JobState::Failed { kind, error, .. }))) => {
                        return Err(SyncError::Failed {
                            job,
                            kind,
                            message: error,
                        })
                    }
                    None if lane.committing.is_none() => return Ok(lane.last_commit.clone()),
                    _ => {}
                }
            }
            if self.inner.shutting_down.load(Ordering::Acquire) {
                return Err(SyncError::ShutDown);
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::ShutDown);
            }
        }
    }

    /// Flush every file with pending work, returning the first failure
    pub async fn flush_all(&self) -> Result<(), SyncError> {
        let mut first_error = None;
        for file_id in self.pending_files() {
            if let Err(e) = self.flush_file(&file_id).await {
                tracing::warn!(%file_id, error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-stage a failed job.
    pub async fn retry(&self, job: JobId) -> Result<(), SyncError> {
        let file_id = {
            let mut state = self.inner.state.lock();
            let SyncState { lanes, jobs } = &mut *state;
            let current = jobs.get(&job).cloned().ok_or(SyncError::UnknownJob(job))?;
            if !matches!(current, JobState::Failed { .. }) {
                return Err(SyncError::InvalidState {
                    job,
                    state: format!("{:?}", current),
                });
            }
            let (file_id, lane) = lanes
                .iter_mut()
                .find(|(_, lane)| lane.staged.as_ref().map(|j| j.id) == Some(job))
                .ok_or(SyncError::UnknownJob(job))?;
            lane.cancelled = false;
            jobs.insert(job, JobState::Staged);
            *file_id
        };
        tracing::info!(%job, %file_id, "retrying failed job");
        self.inner.notify();
        self.inner
            .queue
            .send_async(file_id)
            .await
            .map_err(|_| SyncError::ShutDown)
    }

    /// Resolve a surfaced conflict.
    ///
    /// Returns the remote record when local changes were discarded.
    pub async fn resolve(
        &self,
        file_id: &FileId,
        resolution: Resolution,
    ) -> Result<Option<FileRecord>, SyncError> {
        let remote = self
            .inner
            .with_retry(None, || {
                self.inner
                    .io
                    .catalog_call(self.inner.catalog.get_by_id(file_id))
            })
            .await?;

        let enqueue = {
            let mut state = self.inner.state.lock();
            let SyncState { lanes, jobs } = &mut *state;
            let lane = lanes
                .get_mut(file_id)
                .filter(|lane| lane.conflict.is_some())
                .ok_or(SyncError::NoConflict(*file_id))?;
            lane.conflict = None;
            match resolution {
                Resolution::KeepLocal => match lane.staged.as_mut() {
                    Some(job) => {
                        job.set_base_version(remote.version);
                        jobs.insert(job.id, JobState::Staged);
                        true
                    }
                    None => false,
                },
                Resolution::DiscardLocal => {
                    if let Some(job) = lane.staged.take() {
                        for hash in job.dirty_hashes() {
                            self.inner.io.cache.discard(&hash);
                        }
                        jobs.insert(job.id, JobState::Cancelled);
                        lane.last_commit = Some(CommitNotice {
                            job: job.id,
                            record: remote.clone(),
                            adopt_remote: true,
                        });
                    }
                    false
                }
            }
        };
        tracing::info!(%file_id, ?resolution, remote_version = remote.version, "conflict resolved");
        self.inner.notify();
        if enqueue {
            self.inner
                .queue
                .send_async(*file_id)
                .await
                .map_err(|_| SyncError::ShutDown)?;
            return Ok(None);
        }
        match resolution {
            Resolution::DiscardLocal => Ok(Some(remote)),
            Resolution::KeepLocal => Ok(None),
        }
    }

    /// Drop all pending work for a file that no longer exists.
    pub fn forget(&self, file_id: &FileId) {
        let mut state = self.inner.state.lock();
        let SyncState { lanes, jobs } = &mut *state;
        if let Some(mut lane) = lanes.remove(file_id) {
            if let Some(job) = lane.staged.take() {
                for hash in job.dirty_hashes() {
                    self.inner.io.cache.discard(&hash);
                }
                jobs.insert(job.id, JobState::Cancelled);
            }
            lane.cancelled = true;
            if lane.committing.is_some() {
                // the committer finds the lane gone and releases its own pins
                tracing::debug!(%file_id, "forgetting lane with a commit in flight");
            }
        }
        drop(state);
        self.inner.notify();
    }

    /// Stop retrying pending work for a file after the current attempt
    pub fn cancel(&self, file_id: &FileId) {
        if let Some(lane) = self.inner.state.lock().lanes.get_mut(file_id) {
            lane.cancelled = true;
        }
    }

    pub fn status(&self, file_id: &FileId) -> FileSyncStatus {
        let state = self.inner.state.lock();
        let Some(lane) = state.lanes.get(file_id) else {
            return FileSyncStatus::Clean;
        };
        let staged = lane.staged.as_ref().map(|j| j.id);
        if let (Some(conflict), Some(job)) = (&lane.conflict, staged) {
            return FileSyncStatus::Conflicted {
                job,
                local_base: conflict.local_base,
                remote_version: conflict.remote_version,
            };
        }
        if let Some((job, _)) = lane.committing {
            return FileSyncStatus::Committing { job };
        }
        match staged.map(|job| (job, state.jobs.get(&job))) {
            Some((job, Some(JobState::Failed { error, .. }))) => FileSyncStatus::Failed {
                job,
                error: error.clone(),
            },
            Some((job, _)) => FileSyncStatus::Pending { job },
            None => FileSyncStatus::Clean,
        }
    }

    pub fn job_state(&self, job: &JobId) -> Option<JobState> {
        self.inner.state.lock().jobs.get(job).cloned()
    }

    pub fn last_commit(&self, file_id: &FileId) -> Option<CommitNotice> {
        self.inner
            .state
            .lock()
            .lanes
            .get(file_id)
            .and_then(|lane| lane.last_commit.clone())
    }

    /// Files with staged, committing, failed or conflicted work
    pub fn pending_files(&self) -> Vec<FileId> {
        self.inner
            .state
            .lock()
            .lanes
            .iter()
            .filter(|(_, lane)| lane.staged.is_some() || lane.committing.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    fn worker_finished(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Stop the worker. Commits already in flight run to completion; retries
    /// not yet started are cancelled and their jobs stay dirty.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_one();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync worker panicked");
            }
        }
        self.inner.notify();
        tracing::debug!("sync coordinator stopped");
    }
}

async fn run_worker(inner: Arc<CoordinatorInner>, rx: flume::Receiver<FileId>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            msg = rx.recv_async() => match msg {
                Ok(file_id) => {
                    let inner = inner.clone();
                    tasks.spawn(async move { inner.drain_lane(file_id).await });
                }
                Err(_) => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "commit task panicked");
                }
            }
            _ = inner.shutdown.notified() => break,
        }
    }
    // let in-flight commits finish
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "commit task panicked");
        }
    }
}

impl CoordinatorInner {
    fn notify(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }

    fn is_cancelled(&self, file_id: Option<&FileId>) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return true;
        }
        match file_id {
            Some(id) => self
                .state
                .lock()
                .lanes
                .get(id)
                .map(|lane| lane.cancelled)
                .unwrap_or(true),
            None => false,
        }
    }

    async fn with_retry<T, F, Fut>(&self, file_id: Option<&FileId>, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        self.io
            .retry
            .run(|| self.is_cancelled(file_id), |_| op())
            .await
            .map_err(SyncError::from_retry)
    }

    /// Returns whether the lane is parked on a conflict
    fn stage_locked(&self, file_id: FileId, mut job: SyncJob) -> Result<bool, SyncError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SyncError::ShutDown);
        }
        let hashes = job.dirty_hashes();

        let mut state = self.state.lock();
        let SyncState { lanes, jobs } = &mut *state;

        let mut pinned = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            if self.io.cache.pin(hash) {
                pinned.push(*hash);
            } else {
                for hash in pinned {
                    self.io.cache.discard(&hash);
                }
                return Err(SyncError::StaleChunk(*hash));
            }
        }

        let lane = lanes.entry(file_id).or_default();
        lane.cancelled = false;
        if let Some(old) = lane.staged.take() {
            if let Some(base) = old.base_version() {
                job.set_base_version(base);
            }
            for hash in old.dirty_hashes() {
                self.io.cache.discard(&hash);
            }
            jobs.insert(old.id, JobState::Superseded { by: job.id });
            tracing::trace!(old = %old.id, new = %job.id, %file_id, "superseded staged job");
        }

        let parked = match &lane.conflict {
            Some(conflict) => {
                jobs.insert(
                    job.id,
                    JobState::Conflicted {
                        local_base: conflict.local_base,
                        remote_version: conflict.remote_version,
                    },
                );
                true
            }
            None => {
                jobs.insert(job.id, JobState::Staged);
                false
            }
        };
        tracing::debug!(job = %job.id, %file_id, base = ?job.base_version(), dirty = hashes.len(), "staged write");
        lane.staged = Some(job);
        Ok(parked)
    }

    /// Take the lane's staged job if it is ready to commit
    fn take_ready(&self, file_id: &FileId) -> Option<SyncJob> {
        let mut state = self.state.lock();
        let SyncState { lanes, jobs } = &mut *state;
        let lane = lanes.get_mut(file_id)?;
        if lane.committing.is_some() || lane.conflict.is_some() {
            return None;
        }
        let ready = lane
            .staged
            .as_ref()
            .map(|job| matches!(jobs.get(&job.id), Some(JobState::Staged)))
            .unwrap_or(false);
        if !ready {
            return None;
        }
        let job = lane.staged.take()?;
        lane.committing = Some((job.id, job.base_version().unwrap_or(0)));
        jobs.insert(job.id, JobState::Committing);
        Some(job)
    }

    async fn drain_lane(&self, file_id: FileId) {
        while let Some(job) = self.take_ready(&file_id) {
            self.notify();
            let result = self.commit_write(&file_id, &job).await;
            self.finish(&file_id, job, result);
            self.notify();
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }
        }
    }

    fn finish(&self, file_id: &FileId, job: SyncJob, result: Result<(Committed, bool), SyncError>) {
        let mut state = self.state.lock();
        let SyncState { lanes, jobs } = &mut *state;
        let cache = &self.io.cache;
        let base = job.base_version().unwrap_or(0);

        let Some(lane) = lanes.get_mut(file_id) else {
            // file was removed while committing
            for hash in job.dirty_hashes() {
                match &result {
                    Ok(_) => cache.mark_clean(&hash),
                    Err(_) => cache.discard(&hash),
                }
            }
            jobs.insert(job.id, JobState::Cancelled);
            return;
        };
        lane.committing = None;

        match result {
            Ok((committed, adopt_remote)) => {
                for hash in job.dirty_hashes() {
                    cache.mark_clean(&hash);
                }
                let version = committed.record.version;
                jobs.insert(job.id, JobState::Committed { version });
                if !adopt_remote {
                    if let Some(next) = lane.staged.as_mut() {
                        if next.base_version() == Some(base) {
                            next.set_base_version(version);
                        }
                    }
                }
                lane.last_commit = Some(CommitNotice {
                    job: job.id,
                    record: committed.record,
                    adopt_remote,
                });
                tracing::info!(
                    job = %job.id,
                    %file_id,
                    version,
                    side_copy = ?committed.side_copy.as_ref().map(|r| r.path.as_str()),
                    "committed"
                );
            }
            Err(SyncError::Conflict {
                local_base,
                remote_version,
                ..
            }) => {
                tracing::warn!(job = %job.id, %file_id, local_base, remote_version, "commit conflicted");
                let conflicted = JobState::Conflicted {
                    local_base,
                    remote_version,
                };
                match lane.staged.as_ref() {
                    Some(newer) => {
                        for hash in job.dirty_hashes() {
                            cache.discard(&hash);
                        }
                        jobs.insert(job.id, JobState::Superseded { by: newer.id });
                        jobs.insert(newer.id, conflicted);
                    }
                    None => {
                        jobs.insert(job.id, conflicted);
                        lane.staged = Some(job.clone());
                    }
                }
                lane.conflict = Some(Conflict {
                    file_id: *file_id,
                    path: job.path.clone(),
                    local_base,
                    remote_version,
                });
            }
            Err(e) => {
                let attempts = match &e {
                    SyncError::Network { attempts, .. } | SyncError::Cancelled { attempts, .. } => {
                        *attempts
                    }
                    _ => 1,
                };
                tracing::error!(job = %job.id, %file_id, attempts, error = %e, "commit failed, local changes kept");
                match lane.staged.as_ref() {
                    Some(newer) => {
                        // the newer job carries all of this job's changes
                        for hash in job.dirty_hashes() {
                            cache.discard(&hash);
                        }
                        jobs.insert(job.id, JobState::Superseded { by: newer.id });
                    }
                    None => {
                        jobs.insert(
                            job.id,
                            JobState::Failed {
                                attempts,
                                kind: e.kind(),
                                error: e.to_string(),
                            },
                        );
                        lane.staged = Some(job);
                    }
                }
            }
        }
    }

    /// Commit a write job, applying the conflict policy.
    ///
    /// The boolean is true when the remote version won and local changes
    /// went to a side copy.
    async fn commit_write(
        &self,
        file_id: &FileId,
        job: &SyncJob,
    ) -> Result<(Committed, bool), SyncError> {
        let JobOp::Write {
            base_version,
            chunks,
            ..
        } = &job.op
        else {
            return Err(SyncError::NotAWrite);
        };

        match self.write_chunks(file_id, *base_version, chunks).await {
            Ok(record) => Ok((
                Committed {
                    job: job.id,
                    record,
                    side_copy: None,
                    replaced: None,
                },
                false,
            )),
            Err(SyncError::Conflict {
                local_base,
                remote_version,
                ..
            }) => {
                let remote = self
                    .with_retry(Some(file_id), || {
                        self.io.catalog_call(self.catalog.get_by_id(file_id))
                    })
                    .await?;
                let conflict = Conflict {
                    file_id: *file_id,
                    path: remote.path.clone(),
                    local_base,
                    remote_version: remote.version.max(remote_version),
                };
                match self.resolver.resolve(&conflict)? {
                    ConflictAction::Surface => Err(SyncError::Conflict {
                        file_id: *file_id,
                        local_base,
                        remote_version: conflict.remote_version,
                    }),
                    ConflictAction::BackupLocal { side_path } => {
                        let side = self.write_side_copy(file_id, chunks, &side_path).await?;
                        tracing::warn!(
                            %file_id,
                            path = %remote.path,
                            side_copy = %side.path,
                            "remote version kept, local changes saved as side copy"
                        );
                        Ok((
                            Committed {
                                job: job.id,
                                record: remote,
                                side_copy: Some(side),
                                replaced: None,
                            },
                            true,
                        ))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Seal dirty chunks for `base_version + 1`, upload what the store lacks,
    /// then swap the chunk list in the catalog.
    async fn write_chunks(
        &self,
        file_id: &FileId,
        base_version: u64,
        chunks: &[PendingChunk],
    ) -> Result<FileRecord, SyncError> {
        let key = self.io.keys.derive_file_key(file_id)?;
        let committed: HashMap<ContentHash, ChunkRef> = {
            let state = self.state.lock();
            state
                .lanes
                .get(file_id)
                .and_then(|lane| lane.last_commit.as_ref())
                .filter(|notice| !notice.adopt_remote)
                .map(|notice| {
                    notice
                        .record
                        .chunks
                        .iter()
                        .map(|c| (c.hash, c.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        self.with_retry(Some(file_id), || {
            self.try_write_chunks(file_id, base_version, chunks, &key, &committed)
        })
        .await
    }

    async fn try_write_chunks(
        &self,
        file_id: &FileId,
        base_version: u64,
        chunks: &[PendingChunk],
        key: &Secret,
        committed: &HashMap<ContentHash, ChunkRef>,
    ) -> Result<FileRecord, SyncError> {
        let refs = self
            .seal_all(file_id, base_version + 1, chunks, key, committed, file_id)
            .await?;
        self.io
            .catalog_call(self.catalog.update_file(file_id, base_version, refs))
            .await
            .map_err(|e| match e {
                SyncError::Catalog(CatalogError::Conflict {
                    expected, actual, ..
                }) => SyncError::Conflict {
                    file_id: *file_id,
                    local_base: expected,
                    remote_version: actual,
                },
                e => e,
            })
    }

    /// Produce committed chunk refs for `target` from a pending chunk list.
    ///
    /// `source` is the file the sealed chunks were encrypted for; it differs
    /// from `file_id` when writing a side copy.
    async fn seal_all(
        &self,
        file_id: &FileId,
        target: u64,
        chunks: &[PendingChunk],
        key: &Secret,
        reuse: &HashMap<ContentHash, ChunkRef>,
        source: &FileId,
    ) -> Result<Vec<ChunkRef>, SyncError> {
        let same_file = file_id == source;
        let mut sealed_now: HashMap<ContentHash, ChunkRef> = HashMap::new();
        let mut refs = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            if same_file {
                if let PendingChunk::Sealed(existing) = chunk {
                    refs.push(existing.clone());
                    continue;
                }
                if let Some(existing) = reuse.get(chunk.hash()) {
                    refs.push(existing.clone());
                    continue;
                }
            }
            if let Some(existing) = sealed_now.get(chunk.hash()) {
                refs.push(existing.clone());
                continue;
            }

            let plaintext = match chunk {
                PendingChunk::Dirty { hash, .. } => self
                    .io
                    .cache
                    .get(hash)
                    .ok_or(SyncError::MissingPlaintext(*hash))?,
                PendingChunk::Sealed(existing) => self.io.fetch(existing, source).await?,
            };
            let sealed = self
                .io
                .codec
                .encrypt(&plaintext, key, file_id, index as u64, target)?;
            self.io.upload(&sealed).await?;
            tracing::trace!(%file_id, index, chunk = %sealed.chunk.hash.short(), "sealed chunk");
            sealed_now.insert(sealed.chunk.hash, sealed.chunk.clone());
            refs.push(sealed.chunk);
        }
        Ok(refs)
    }

    /// Commit local chunks as a new file at `side_path`.
    async fn write_side_copy(
        &self,
        source: &FileId,
        chunks: &[PendingChunk],
        side_path: &str,
    ) -> Result<FileRecord, SyncError> {
        let catalog = &self.catalog;
        let io = &self.io;
        let created = self
            .with_retry(None, move || async move {
                match io.catalog_call(catalog.create_file(side_path, Vec::new())).await {
                    // an earlier attempt may have created it before timing out
                    Err(SyncError::Catalog(CatalogError::AlreadyExists(_))) => {
                        io.catalog_call(catalog.get_file(side_path)).await
                    }
                    other => other,
                }
            })
            .await?;

        let key = self.io.keys.derive_file_key(&created.id)?;
        let empty = HashMap::new();
        let (this, created, key, empty) = (self, &created, &key, &empty);
        self.with_retry(None, move || async move {
            let refs = this
                .seal_all(&created.id, created.version + 1, chunks, key, empty, source)
                .await?;
            this.io
                .catalog_call(this.catalog.update_file(&created.id, created.version, refs))
                .await
        })
        .await
    }
}
