//! On-disk tier for clean chunks.
//!
//! Files live at `<root>/<hh>/<hash-hex>` where `hh` is the first byte of the
//! plaintext hash. Layout is keyed by content only, so renames never touch
//! the cache. Every load is re-hashed before it is trusted.
//!
//! Writes are queued to a dedicated writer thread; callers never wait on
//! file creation or `fsync`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::CacheError;
use crate::chunk::ContentHash;

#[derive(Debug)]
pub(crate) struct DiskTier {
    files: Arc<DiskFiles>,
    writes: flume::Sender<WriteRequest>,
}

#[derive(Debug)]
enum WriteRequest {
    Store(ContentHash, Bytes),
    /// Answered once every earlier request has been handled
    Barrier(flume::Sender<()>),
}

#[derive(Debug)]
struct DiskFiles {
    root: PathBuf,
    max_bytes: u64,
    index: Mutex<DiskIndex>,
}

#[derive(Debug)]
struct DiskIndex {
    entries: LruCache<ContentHash, u64>,
    used_bytes: u64,
}

impl DiskTier {
    /// Open (or create) a tier rooted at `root`, indexing what is already
    /// there, and start its writer thread
    pub fn open(root: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        let files = Arc::new(DiskFiles::open(root, max_bytes)?);
        let (tx, rx) = flume::unbounded();
        let writer = files.clone();
        thread::Builder::new()
            .name("vaultfs-disk-cache".to_string())
            .spawn(move || run_writer(writer, rx))?;
        Ok(Self { files, writes: tx })
    }

    /// Load and verify a chunk. Corrupt files are deleted.
    pub fn load(&self, hash: &ContentHash) -> Option<Bytes> {
        self.files.load(hash)
    }

    /// Queue a clean chunk for persistence
    pub fn store(&self, hash: &ContentHash, data: Bytes) {
        if self.files.contains(hash) {
            return;
        }
        if self
            .writes
            .send(WriteRequest::Store(*hash, data))
            .is_err()
        {
            tracing::warn!(chunk = %hash.short(), "disk cache writer stopped, entry not persisted");
        }
    }

    /// Block until every queued write has reached disk
    pub fn sync(&self) {
        let (tx, rx) = flume::bounded(1);
        if self.writes.send(WriteRequest::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    #[cfg(test)]
    fn used_bytes(&self) -> u64 {
        self.files.index.lock().used_bytes
    }

    #[cfg(test)]
    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.files.path_for(hash)
    }
}

fn run_writer(files: Arc<DiskFiles>, rx: flume::Receiver<WriteRequest>) {
    for request in rx.iter() {
        match request {
            WriteRequest::Store(hash, data) => files.store(&hash, &data),
            WriteRequest::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!(root = %files.root.display(), "disk cache writer stopped");
}

impl DiskFiles {
    fn open(root: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        fs::create_dir_all(root)?;

        let mut found = Vec::new();
        for shard in fs::read_dir(root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let file = file?;
                let name = file.file_name();
                let Some(hash) = name.to_str().and_then(|n| ContentHash::from_hex(n).ok()) else {
                    continue;
                };
                let meta = file.metadata()?;
                let modified = meta.modified().ok();
                found.push((modified, hash, meta.len()));
            }
        }
        // oldest first so the most recent files end up most recently used
        found.sort_by_key(|(modified, _, _)| *modified);

        let mut index = DiskIndex {
            entries: LruCache::unbounded(),
            used_bytes: 0,
        };
        for (_, hash, len) in found {
            index.entries.put(hash, len);
            index.used_bytes += len;
        }
        tracing::debug!(
            root = %root.display(),
            entries = index.entries.len(),
            used_bytes = index.used_bytes,
            "opened disk cache tier"
        );

        let files = Self {
            root: root.to_path_buf(),
            max_bytes,
            index: Mutex::new(index),
        };
        files.trim();
        Ok(files)
    }

    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn contains(&self, hash: &ContentHash) -> bool {
        self.index.lock().entries.contains(hash)
    }

    fn load(&self, hash: &ContentHash) -> Option<Bytes> {
        if self.index.lock().entries.get(hash).is_none() {
            return None;
        }
        let path = self.path_for(hash);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(chunk = %hash.short(), error = %e, "disk cache read failed");
                self.forget(hash);
                return None;
            }
        };
        if ContentHash::of(&data) != *hash {
            tracing::warn!(chunk = %hash.short(), "disk cache entry failed verification, dropping");
            let _ = fs::remove_file(&path);
            self.forget(hash);
            return None;
        }
        Some(Bytes::from(data))
    }

    /// Persist a clean chunk. Failures are logged, not returned.
    fn store(&self, hash: &ContentHash, data: &[u8]) {
        if self.index.lock().entries.get(hash).is_some() {
            return;
        }
        if let Err(e) = self.write_file(hash, data) {
            tracing::warn!(chunk = %hash.short(), error = %e, "failed to write disk cache entry");
            return;
        }
        {
            let mut index = self.index.lock();
            if index.entries.put(*hash, data.len() as u64).is_none() {
                index.used_bytes += data.len() as u64;
            }
        }
        self.trim();
    }

    fn write_file(&self, hash: &ContentHash, data: &[u8]) -> Result<(), std::io::Error> {
        let path = self.path_for(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_data()?;
        fs::rename(&tmp, &path)
    }

    fn forget(&self, hash: &ContentHash) {
        let mut index = self.index.lock();
        if let Some(len) = index.entries.pop(hash) {
            index.used_bytes = index.used_bytes.saturating_sub(len);
        }
    }

    /// Remove least recently used files until the tier fits its budget
    fn trim(&self) {
        let mut victims = Vec::new();
        {
            let mut index = self.index.lock();
            while index.used_bytes > self.max_bytes {
                match index.entries.pop_lru() {
                    Some((hash, len)) => {
                        index.used_bytes = index.used_bytes.saturating_sub(len);
                        victims.push(hash);
                    }
                    None => break,
                }
            }
        }
        for hash in victims {
            let _ = fs::remove_file(self.path_for(&hash));
        }
    }

}
