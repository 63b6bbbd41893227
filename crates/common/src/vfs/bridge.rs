use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::attr::{DirListing, FileAttr};
use super::file_state::{block_range, overlap, seal_committed, FileState, OpenFile};
use super::handle::{Handle, HandleState, OpenMode};
use crate::auth::Principal;
use crate::catalog::{normalize, CatalogError, EntryKind, FileRecord, MetadataCatalog};
use crate::chunk::{ChunkRef, ContentHash, FileId};
use crate::error::FsError;
use crate::sync::{ChunkIo, FileSyncStatus, PendingChunk, Resolution, SyncCoordinator, SyncError};

/// Result of `open` and `create`
#[derive(Debug, Clone)]
pub struct Opened {
    pub fh: u64,
    pub attr: FileAttr,
}

/// Chunk list being built by a mutation before it is staged
struct Draft {
    chunks: Vec<PendingChunk>,
    size: u64,
}

/// Maps filesystem operations onto chunks, the local cache and the sync
/// coordinator.
///
/// Paths are absolute and `/`-separated. Handles are plain integers handed
/// out by `open` and `create` and retired by `release`.
pub struct VirtualFilesystemBridge {
    catalog: Arc<dyn MetadataCatalog>,
    io: ChunkIo,
    coordinator: SyncCoordinator,
    principal: Principal,
    /// Files with open handles or uncommitted local writes
    files: Mutex<HashMap<FileId, Arc<OpenFile>>>,
    handles: RwLock<HashMap<u64, Arc<Handle>>>,
    next_fh: AtomicU64,
}

impl std::fmt::Debug for VirtualFilesystemBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFilesystemBridge")
            .field("principal", &self.principal)
            .field("open_files", &self.files.lock().len())
            .field("handles", &self.handles.read().len())
            .finish()
    }
}

impl VirtualFilesystemBridge {
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        io: ChunkIo,
        coordinator: SyncCoordinator,
        principal: Principal,
    ) -> Self {
        Self {
            catalog,
            io,
            coordinator,
            principal,
            files: Mutex::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn block_size(&self) -> usize {
        self.io.codec().block_size()
    }

    pub fn open_handles(&self) -> usize {
        self.handles.read().len()
    }

    pub fn handle_state(&self, fh: u64) -> HandleState {
        self.handles
            .read()
            .get(&fh)
            .map(|h| h.state())
            .unwrap_or(HandleState::Closed)
    }

    // ---- lookups ----

    pub async fn lookup(&self, path: &str) -> Result<FileAttr, FsError> {
        let record = self.catalog_op(|| self.catalog.get_file(path)).await?;
        Ok(self.overlay(&record).await)
    }

    pub async fn getattr(&self, path: &str) -> Result<FileAttr, FsError> {
        self.lookup(path).await
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<DirListing>, FsError> {
        let entries = self.catalog_op(|| self.catalog.list_dir(path)).await?;
        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            let open = self.files.lock().get(&entry.id).cloned();
            let mut row = DirListing::from(entry);
            if let Some(file) = open {
                let state = file.state.read().await;
                row.size = state.size;
                row.dirty = state.dirty;
            }
            listing.push(row);
        }
        Ok(listing)
    }

    pub async fn sync_status(&self, path: &str) -> Result<FileSyncStatus, FsError> {
        let record = self.catalog_op(|| self.catalog.get_file(path)).await?;
        Ok(self.coordinator.status(&record.id))
    }

    // ---- handles ----

    pub async fn open(&self, path: &str, mode: OpenMode) -> Result<Opened, FsError> {
        if mode.is_mutating() {
            self.check_writable(path)?;
        }
        let record = self.catalog_op(|| self.catalog.get_file(path)).await?;
        if record.is_dir() {
            return Err(FsError::IsADirectory(record.path));
        }

        let file = self.acquire(&record).await;
        if mode.truncate {
            if let Err(e) = self.resize(&file, 0).await {
                self.relinquish(&file).await;
                return Err(e);
            }
        }
        let fh = self.register(file.clone(), mode);
        tracing::debug!(fh, path = %record.path, ?mode, "opened");
        let mut attr = FileAttr::from(&record);
        self.apply_view(&file, &mut attr).await;
        Ok(Opened { fh, attr })
    }

    /// Create an empty file and open it read-write.
    pub async fn create(&self, path: &str) -> Result<Opened, FsError> {
        self.check_writable(path)?;
        let job = self.coordinator.create_job(path, EntryKind::File);
        let committed = self.coordinator.commit(job).await?;
        let file = self.acquire(&committed.record).await;
        let fh = self.register(file, OpenMode::READ_WRITE);
        tracing::debug!(fh, path = %committed.record.path, id = %committed.record.id, "created");
        Ok(Opened {
            fh,
            attr: FileAttr::from(&committed.record),
        })
    }

    pub async fn read(&self, fh: u64, offset: u64, len: u32) -> Result<Bytes, FsError> {
        let handle = self.handle(fh)?;
        if !handle.mode.read {
            return Err(FsError::BadHandle(fh));
        }
        let file = &handle.file;
        let mut guard = file.state.write().await;
        self.sync_view(&file.id, &mut guard)?;
        let state = guard.downgrade();

        if len == 0 || offset >= state.size {
            return Ok(Bytes::new());
        }
        let end = state.size.min(offset + len as u64);

        // offsets follow chunk lengths, not the configured block size
        let mut parts = Vec::new();
        let mut start = 0u64;
        for (index, chunk) in state.chunks.iter().enumerate() {
            let chunk_end = start + chunk.len() as u64;
            if chunk_end > offset {
                let block = self.load_chunk(&file.id, chunk).await?;
                let range = (offset.max(start) - start) as usize..(end.min(chunk_end) - start) as usize;
                parts.push(slice_block(&block, range, index)?);
            }
            if chunk_end >= end {
                break;
            }
            start = chunk_end;
        }

        if parts.len() == 1 {
            return Ok(parts.swap_remove(0));
        }
        let mut out = BytesMut::with_capacity((end - offset) as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Write `data` at `offset`, growing the file and zero-filling any gap.
    ///
    /// Each partially covered block is read, patched and cached as a new dirty
    /// chunk; fully covered blocks are replaced outright. The whole updated
    /// chunk list becomes one staged job.
    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let handle = self.handle(fh)?;
        if !handle.mode.write {
            return Err(FsError::BadHandle(fh));
        }
        self.check_writable("write")?;
        if data.is_empty() {
            return Ok(0);
        }

        let file = &handle.file;
        let mut state = file.state.write().await;
        self.sync_view(&file.id, &mut state)?;

        let offset = if handle.mode.append { state.size } else { offset };
        let end = offset + data.len() as u64;
        let block_size = self.block_size() as u64;

        let mut pins = Vec::new();
        let result = async {
            let mut draft = Draft {
                chunks: state.chunks.clone(),
                size: state.size,
            };
            if offset > draft.size {
                self.resize_draft(&file.id, &mut draft, offset, &mut pins)
                    .await?;
            }
            for index in block_range(offset, end, block_size) {
                let range = overlap(index, offset, end, block_size);
                let src_start = (index as u64 * block_size + range.start as u64 - offset) as usize;
                let src = &data[src_start..src_start + range.len()];

                let block = match draft.chunks.get(index) {
                    Some(current) if range.start == 0 && range.end >= current.len() as usize => {
                        src.to_vec()
                    }
                    Some(current) => {
                        let mut block = self.load_chunk(&file.id, current).await?.to_vec();
                        if block.len() < range.end {
                            block.resize(range.end, 0);
                        }
                        block[range].copy_from_slice(src);
                        block
                    }
                    // new trailing block, `range` starts at its first byte
                    None => src.to_vec(),
                };
                let chunk = self.put_block(block, &mut pins)?;
                if index < draft.chunks.len() {
                    draft.chunks[index] = chunk;
                } else {
                    draft.chunks.push(chunk);
                }
            }
            draft.size = draft.size.max(end);
            self.stage_draft(&file.id, &mut state, draft).await
        }
        .await;
        self.unpin(pins);
        result?;

        handle.set_state(HandleState::Dirty);
        tracing::trace!(fh, id = %file.id, offset, len = data.len(), "write staged");
        Ok(data.len() as u32)
    }

    /// Commit pending writes for the handle's file and wait for the outcome.
    ///
    /// On failure the local dirty state is kept and the error is returned.
    pub async fn flush(&self, fh: u64) -> Result<(), FsError> {
        let handle = self.handle(fh)?;
        self.flush_handle(&handle).await
    }

    async fn flush_handle(&self, handle: &Handle) -> Result<(), FsError> {
        let file = &handle.file;
        if file.state.read().await.removed {
            return Ok(());
        }
        handle.set_state(HandleState::Flushing);
        match self.coordinator.flush_file(&file.id).await {
            Ok(notice) => {
                let mut state = file.state.write().await;
                if let Some(notice) = notice {
                    state.adopt(&notice);
                }
                if self.coordinator.status(&file.id) == FileSyncStatus::Clean {
                    state.dirty = false;
                }
                handle.set_state(if state.dirty {
                    HandleState::Dirty
                } else {
                    HandleState::Open
                });
                Ok(())
            }
            Err(e) => {
                handle.set_state(HandleState::Dirty);
                tracing::warn!(fh = handle.fh, id = %file.id, error = %e, "flush failed, changes kept locally");
                Err(e.into())
            }
        }
    }

    /// Flush and close a handle. The handle is closed even if the flush fails.
    ///
    /// If the caller abandons the release before the flush settles, the
    /// handle is still closed and retries not yet started for the file are
    /// cancelled; its changes stay staged until the next flush.
    pub async fn release(&self, fh: u64) -> Result<(), FsError> {
        let handle = self.handle(fh)?;
        let mut closing = Closing {
            bridge: self,
            handle: &handle,
            settled: false,
        };
        let flushed = self.flush_handle(&handle).await;
        closing.settled = true;
        handle.set_state(HandleState::Closed);
        self.handles.write().remove(&fh);
        self.relinquish(&handle.file).await;
        tracing::debug!(fh, id = %handle.file.id, ok = flushed.is_ok(), "released");
        flushed
    }

    // ---- namespace ----

    pub async fn truncate(&self, path: &str, size: u64) -> Result<FileAttr, FsError> {
        self.check_writable(path)?;
        let record = self.catalog_op(|| self.catalog.get_file(path)).await?;
        if record.is_dir() {
            return Err(FsError::IsADirectory(record.path));
        }
        let file = self.acquire(&record).await;
        let result = async {
            self.resize(&file, size).await?;
            let notice = self.coordinator.flush_file(&file.id).await?;
            let mut state = file.state.write().await;
            if let Some(notice) = notice {
                state.adopt(&notice);
            }
            Ok::<_, FsError>(())
        }
        .await;
        let mut attr = FileAttr::from(&record);
        self.apply_view(&file, &mut attr).await;
        self.relinquish(&file).await;
        result?;
        Ok(attr)
    }

    pub async fn mkdir(&self, path: &str) -> Result<FileAttr, FsError> {
        self.check_writable(path)?;
        let job = self.coordinator.create_job(path, EntryKind::Directory);
        let committed = self.coordinator.commit(job).await?;
        Ok(FileAttr::from(&committed.record))
    }

    /// Remove a file. Ciphertext no other record references is deleted from
    /// the chunk store.
    pub async fn unlink(&self, path: &str) -> Result<(), FsError> {
        self.check_writable(path)?;
        let job = self.coordinator.remove_job(path, EntryKind::File);
        let committed = self.coordinator.commit(job).await?;
        self.mark_removed(&committed.record.id).await;
        self.collect_garbage(&committed.record.chunks).await;
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), FsError> {
        self.check_writable(path)?;
        let job = self.coordinator.remove_job(path, EntryKind::Directory);
        self.coordinator.commit(job).await?;
        Ok(())
    }

    /// Atomically move `from` to `to`, replacing a file at `to`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<FileAttr, FsError> {
        self.check_writable(from)?;
        let old = normalize(from)?;
        let job = self.coordinator.rename_job(from, to);
        let committed = self.coordinator.commit(job).await?;
        let new = committed.record.path.clone();

        let open: Vec<Arc<OpenFile>> = self.files.lock().values().cloned().collect();
        for file in open {
            let mut state = file.state.write().await;
            let moved = if state.path == old {
                Some(new.clone())
            } else {
                state
                    .path
                    .strip_prefix(&format!("{}/", old))
                    .map(|rest| format!("{}/{}", new, rest))
            };
            if let Some(path) = moved {
                state.path = path;
            }
        }

        if let Some(replaced) = &committed.replaced {
            self.coordinator.forget(&replaced.id);
            self.mark_removed(&replaced.id).await;
            self.collect_garbage(&replaced.chunks).await;
        }
        Ok(self.overlay(&committed.record).await)
    }

    /// Settle a surfaced conflict on `path`.
    ///
    /// `KeepLocal` re-commits local changes on top of the remote version and
    /// waits for that commit. `DiscardLocal` reloads the remote version.
    pub async fn resolve_conflict(
        &self,
        path: &str,
        resolution: Resolution,
    ) -> Result<FileAttr, FsError> {
        self.check_writable(path)?;
        let record = self.catalog_op(|| self.catalog.get_file(path)).await?;
        let open = self.files.lock().get(&record.id).cloned();

        match self.coordinator.resolve(&record.id, resolution).await? {
            Some(remote) => {
                if let Some(file) = &open {
                    let mut state = file.state.write().await;
                    state.reset_to(&remote);
                    state.last_job = None;
                }
                Ok(FileAttr::from(&remote))
            }
            None => {
                let notice = self.coordinator.flush_file(&record.id).await?;
                if let (Some(file), Some(notice)) = (&open, notice) {
                    file.state.write().await.adopt(&notice);
                }
                self.lookup(path).await
            }
        }
    }

    /// Flush every file with pending writes
    pub async fn flush_all(&self) -> Result<(), FsError> {
        self.coordinator.flush_all().await?;
        let open: Vec<Arc<OpenFile>> = self.files.lock().values().cloned().collect();
        for file in open {
            let mut state = file.state.write().await;
            if let Some(notice) = self.coordinator.last_commit(&file.id) {
                state.adopt(&notice);
            }
        }
        Ok(())
    }

    // ---- internals ----

    fn check_writable(&self, target: &str) -> Result<(), FsError> {
        if self.principal.can_write {
            return Ok(());
        }
        tracing::warn!(principal = %self.principal.name, target, "write denied");
        Err(FsError::PermissionDenied(format!(
            "{} has read-only access",
            self.principal.name
        )))
    }

    fn handle(&self, fh: u64) -> Result<Arc<Handle>, FsError> {
        self.handles
            .read()
            .get(&fh)
            .cloned()
            .ok_or(FsError::BadHandle(fh))
    }

    fn register(&self, file: Arc<OpenFile>, mode: OpenMode) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles
            .write()
            .insert(fh, Arc::new(Handle::new(fh, mode, file)));
        fh
    }

    /// Catalog call with the configured timeout and retry policy
    async fn catalog_op<T, F, Fut>(&self, op: F) -> Result<T, FsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        self.io
            .retry
            .run(|| false, |_| self.io.catalog_call(op()))
            .await
            .map_err(|e| SyncError::from_retry(e).into())
    }

    /// Shared view for `record`, refreshed if nothing local is pending
    async fn acquire(&self, record: &FileRecord) -> Arc<OpenFile> {
        let file = {
            let mut files = self.files.lock();
            let file = files
                .entry(record.id)
                .or_insert_with(|| Arc::new(OpenFile::new(record)))
                .clone();
            file.users.fetch_add(1, Ordering::SeqCst);
            file
        };
        let mut state = file.state.write().await;
        if state.is_stale(record) {
            tracing::debug!(id = %record.id, from = state.base_version, to = record.version, "refreshing view");
            state.reset_to(record);
        }
        state.path = record.path.clone();
        drop(state);
        file
    }

    /// Drop a use of `file`; clean, unused views leave the table
    async fn relinquish(&self, file: &Arc<OpenFile>) {
        if file.users.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let dirty = file.state.read().await.dirty;
        if dirty {
            return;
        }
        let mut files = self.files.lock();
        let unused = file.users.load(Ordering::SeqCst) == 0;
        if unused && files.get(&file.id).is_some_and(|f| Arc::ptr_eq(f, file)) {
            files.remove(&file.id);
        }
    }

    async fn mark_removed(&self, id: &FileId) {
        let removed = self.files.lock().remove(id);
        if let Some(file) = removed {
            let mut state = file.state.write().await;
            state.removed = true;
            state.dirty = false;
        }
    }

    /// Fold the latest commit into the view
    fn sync_view(&self, id: &FileId, state: &mut FileState) -> Result<(), FsError> {
        if state.removed {
            return Err(FsError::NotFound(state.path.clone()));
        }
        if let Some(notice) = self.coordinator.last_commit(id) {
            state.adopt(&notice);
        }
        Ok(())
    }

    async fn overlay(&self, record: &FileRecord) -> FileAttr {
        let mut attr = FileAttr::from(record);
        let open = self.files.lock().get(&record.id).cloned();
        if let Some(file) = open {
            self.apply_view(&file, &mut attr).await;
        }
        attr
    }

    async fn apply_view(&self, file: &OpenFile, attr: &mut FileAttr) {
        let state = file.state.read().await;
        if state.dirty {
            attr.size = state.size;
            attr.modified_at = state.modified_at;
            attr.dirty = true;
        }
    }

    /// Plaintext of one chunk of a local view
    async fn load_chunk(&self, id: &FileId, chunk: &PendingChunk) -> Result<Bytes, FsError> {
        match chunk {
            PendingChunk::Sealed(chunk) => Ok(self.io.fetch(chunk, id).await?),
            PendingChunk::Dirty { hash, .. } => {
                if let Some(bytes) = self.io.cache().get(hash) {
                    return Ok(bytes);
                }
                // committed and evicted since the view last synced
                let committed: Option<ChunkRef> = self
                    .coordinator
                    .last_commit(id)
                    .and_then(|n| n.record.chunks.into_iter().find(|c| c.hash == *hash));
                match committed {
                    Some(chunk) => Ok(self.io.fetch(&chunk, id).await?),
                    None => Err(FsError::Io(format!(
                        "plaintext for chunk {} is gone",
                        hash.short()
                    ))),
                }
            }
        }
    }

    /// Cache a new dirty block. The pin is recorded in `pins` and must be
    /// released once the block is staged.
    fn put_block(
        &self,
        block: Vec<u8>,
        pins: &mut Vec<ContentHash>,
    ) -> Result<PendingChunk, FsError> {
        let hash = ContentHash::of(&block);
        let len = block.len() as u32;
        self.io.cache().put(hash, Bytes::from(block), true)?;
        pins.push(hash);
        Ok(PendingChunk::Dirty { hash, len })
    }

    fn unpin(&self, pins: Vec<ContentHash>) {
        for hash in pins {
            self.io.cache().discard(&hash);
        }
    }

    /// Grow (zero-filled) or shrink a draft to `new_size`
    async fn resize_draft(
        &self,
        id: &FileId,
        draft: &mut Draft,
        new_size: u64,
        pins: &mut Vec<ContentHash>,
    ) -> Result<(), FsError> {
        let block_size = self.block_size() as u64;

        if new_size < draft.size {
            let keep = new_size.div_ceil(block_size) as usize;
            draft.chunks.truncate(keep);
            if let Some(last) = draft.chunks.last() {
                let tail = (new_size - (keep as u64 - 1) * block_size) as usize;
                if last.len() as usize != tail {
                    let block = self.load_chunk(id, last).await?;
                    draft.chunks[keep - 1] = self.put_block(block[..tail].to_vec(), pins)?;
                }
            }
        } else if new_size > draft.size {
            if let Some(last) = draft.chunks.last() {
                if (last.len() as u64) < block_size {
                    let index = draft.chunks.len() - 1;
                    let start = index as u64 * block_size;
                    let want = block_size.min(new_size - start) as usize;
                    let mut block = self.load_chunk(id, last).await?.to_vec();
                    block.resize(want, 0);
                    draft.chunks[index] = self.put_block(block, pins)?;
                }
            }
            while (draft.chunks.len() as u64) * block_size < new_size {
                let start = draft.chunks.len() as u64 * block_size;
                let want = block_size.min(new_size - start) as usize;
                let zeros = self.put_block(vec![0; want], pins)?;
                draft.chunks.push(zeros);
            }
        }
        draft.size = new_size;
        Ok(())
    }

    /// Resize a file's view and stage the result
    async fn resize(&self, file: &OpenFile, new_size: u64) -> Result<(), FsError> {
        let mut state = file.state.write().await;
        self.sync_view(&file.id, &mut state)?;
        if state.size == new_size {
            return Ok(());
        }
        let mut pins = Vec::new();
        let result = async {
            let mut draft = Draft {
                chunks: state.chunks.clone(),
                size: state.size,
            };
            self.resize_draft(&file.id, &mut draft, new_size, &mut pins)
                .await?;
            self.stage_draft(&file.id, &mut state, draft).await
        }
        .await;
        self.unpin(pins);
        result
    }

    /// Stage a draft as the file's next write job and make it the view.
    ///
    /// If a commit finished after the view was synced, the chunks it sealed
    /// are no longer dirty; the draft is re-synced and staged once more.
    async fn stage_draft(
        &self,
        id: &FileId,
        state: &mut FileState,
        mut draft: Draft,
    ) -> Result<(), FsError> {
        let mut retried = false;
        loop {
            let job =
                self.coordinator
                    .write_job(*id, &state.path, state.base_version, draft.chunks.clone());
            match self.coordinator.stage(job).await {
                Ok(job) => {
                    state.chunks = draft.chunks;
                    state.size = draft.size;
                    state.last_job = Some(job);
                    state.modified_at = Utc::now();
                    state.dirty = true;
                    return Ok(());
                }
                Err(SyncError::StaleChunk(hash)) if !retried => {
                    tracing::debug!(%id, chunk = %hash.short(), "view raced a commit, re-syncing");
                    retried = true;
                    if let Some(notice) = self.coordinator.last_commit(id) {
                        state.adopt(&notice);
                        seal_committed(&mut draft.chunks, &notice.record);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete ciphertext that no record references any more. Failures are
    /// logged, never returned.
    async fn collect_garbage(&self, chunks: &[ChunkRef]) {
        let mut seen = HashSet::new();
        let mut deleted = 0usize;
        for chunk in chunks {
            let key = chunk.storage_key;
            if !seen.insert(key) {
                continue;
            }
            match self.catalog.chunk_in_use(&key).await {
                Ok(true) => {}
                Ok(false) => match self.io.store_call(self.io.store.delete(&key)).await {
                    Ok(()) => deleted += 1,
                    Err(e) => tracing::warn!(chunk = %key.short(), error = %e, "chunk delete failed"),
                },
                Err(e) => tracing::warn!(chunk = %key.short(), error = %e, "chunk reference check failed"),
            }
        }
        if deleted > 0 {
            tracing::debug!(deleted, "collected unreferenced chunks");
        }
    }
}

/// Closes a handle whose release was dropped mid-flush
struct Closing<'a> {
    bridge: &'a VirtualFilesystemBridge,
    handle: &'a Handle,
    settled: bool,
}

impl Drop for Closing<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let file = &self.handle.file;
        self.bridge.coordinator.cancel(&file.id);
        self.handle.set_state(HandleState::Closed);
        self.bridge.handles.write().remove(&self.handle.fh);
        // the dirty view stays in the file table for the next open
        file.users.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(fh = self.handle.fh, id = %file.id, "release abandoned, pending retries cancelled");
    }
}

fn slice_block(block: &Bytes, range: std::ops::Range<usize>, index: usize) -> Result<Bytes, FsError> {
    if range.end > block.len() {
        return Err(FsError::Integrity(format!(
            "block {} is {} bytes, expected at least {}",
            index,
            block.len(),
            range.end
        )));
    }
    Ok(block.slice(range))
}
