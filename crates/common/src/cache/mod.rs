//! Bounded cache of decrypted chunks, keyed by plaintext hash.
//!
//! Clean entries live in sharded LRU lists and are evicted least recently
//! used first across all shards. Dirty entries (uncommitted writes) are kept
//! apart, reference counted by the sync jobs that need them, and are never
//! evicted: they leave the dirty set only through [`LocalCache::mark_clean`]
//! after a successful commit or [`LocalCache::discard`] on rollback.
//!
//! Lookups take the dirty set's read lock and then a single shard lock, so
//! reads of different chunks rarely contend and never wait on each other
//! for the dirty set. No lock is held across disk writes; those go to the
//! disk tier's writer thread.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::chunk::ContentHash;
use crate::config::MountConfig;

mod disk;
mod stats;

use disk::DiskTier;
use stats::Counters;
pub use stats::CacheStats;

const SHARDS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Staging more dirty data would exceed the cache budget
    #[error("cannot stage {needed} more dirty bytes: {dirty} of {budget} bytes already dirty")]
    Exhausted { needed: u64, dirty: u64, budget: u64 },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct CleanEntry {
    bytes: Bytes,
    /// Global access tick, larger is more recent
    tick: u64,
}

#[derive(Debug)]
struct DirtyEntry {
    bytes: Bytes,
    pins: u32,
}

#[derive(Debug)]
pub struct LocalCache {
    shards: Vec<Mutex<LruCache<ContentHash, CleanEntry>>>,
    dirty: RwLock<HashMap<ContentHash, DirtyEntry>>,
    clock: AtomicU64,
    clean_bytes: AtomicU64,
    clean_entries: AtomicU64,
    dirty_bytes: AtomicU64,
    max_bytes: u64,
    max_entries: Option<u64>,
    /// Serializes eviction passes so two writers don't both evict for the
    /// same overflow
    evicting: Mutex<()>,
    disk: Option<DiskTier>,
    counters: Counters,
}

impl LocalCache {
    pub fn new(max_bytes: u64, max_entries: Option<usize>) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(LruCache::unbounded())).collect(),
            dirty: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            clean_bytes: AtomicU64::new(0),
            clean_entries: AtomicU64::new(0),
            dirty_bytes: AtomicU64::new(0),
            max_bytes,
            max_entries: max_entries.map(|n| n as u64),
            evicting: Mutex::new(()),
            disk: None,
            counters: Counters::default(),
        }
    }

    /// Back the memory cache with an on-disk tier for clean chunks
    pub fn with_disk_tier(mut self, dir: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        self.disk = Some(DiskTier::open(dir, max_bytes)?);
        Ok(self)
    }

    pub fn from_config(config: &MountConfig) -> Result<Self, CacheError> {
        let cache = Self::new(config.cache_max_bytes, config.cache_max_entries);
        match &config.cache_dir {
            Some(dir) => cache.with_disk_tier(dir, config.cache_disk_max_bytes),
            None => Ok(cache),
        }
    }

    fn shard(&self, hash: &ContentHash) -> &Mutex<LruCache<ContentHash, CleanEntry>> {
        &self.shards[hash.as_bytes()[0] as usize % SHARDS]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a chunk's plaintext.
    pub fn get(&self, hash: &ContentHash) -> Option<Bytes> {
        if let Some(entry) = self.dirty.read().get(hash) {
            Counters::bump(&self.counters.hits);
            return Some(entry.bytes.clone());
        }

        let tick = self.tick();
        if let Some(entry) = self.shard(hash).lock().get_mut(hash) {
            entry.tick = tick;
            Counters::bump(&self.counters.hits);
            return Some(entry.bytes.clone());
        }

        if let Some(bytes) = self.disk.as_ref().and_then(|d| d.load(hash)) {
            Counters::bump(&self.counters.hits);
            Counters::bump(&self.counters.disk_hits);
            self.insert_clean(*hash, bytes.clone());
            self.evict_if_needed();
            return Some(bytes);
        }

        Counters::bump(&self.counters.misses);
        None
    }

    /// Insert a chunk.
    ///
    /// A dirty insert pins the entry once; every pin must be balanced by
    /// [`LocalCache::mark_clean`] or [`LocalCache::discard`]. Fails with
    /// [`CacheError::Exhausted`] when dirty data alone would overflow the
    /// budget.
    pub fn put(&self, hash: ContentHash, bytes: Bytes, dirty: bool) -> Result<(), CacheError> {
        if dirty {
            self.put_dirty(hash, bytes)?;
        } else if !self.dirty.read().contains_key(&hash) {
            self.insert_clean(hash, bytes.clone());
            self.persist(&hash, bytes);
        }
        self.evict_if_needed();
        Ok(())
    }

    fn put_dirty(&self, hash: ContentHash, bytes: Bytes) -> Result<(), CacheError> {
        let mut dirty = self.dirty.write();
        if let Some(entry) = dirty.get_mut(&hash) {
            entry.pins += 1;
            return Ok(());
        }

        let len = bytes.len() as u64;
        let dirty_bytes = self.dirty_bytes.load(Ordering::Relaxed);
        let over_bytes = dirty_bytes + len > self.max_bytes;
        let over_entries = self
            .max_entries
            .map(|max| dirty.len() as u64 + 1 > max)
            .unwrap_or(false);
        if over_bytes || over_entries {
            return Err(CacheError::Exhausted {
                needed: len,
                dirty: dirty_bytes,
                budget: self.max_bytes,
            });
        }

        dirty.insert(hash, DirtyEntry { bytes, pins: 1 });
        self.dirty_bytes.fetch_add(len, Ordering::Relaxed);
        Counters::bump(&self.counters.inserts);
        tracing::trace!(chunk = %hash.short(), len, "cached dirty chunk");
        Ok(())
    }

    /// Add a pin to an existing dirty entry.
    ///
    /// Returns `false` if the chunk is not dirty (already committed or
    /// discarded), in which case nothing is pinned.
    pub fn pin(&self, hash: &ContentHash) -> bool {
        match self.dirty.write().get_mut(hash) {
            Some(entry) => {
                entry.pins += 1;
                true
            }
            None => false,
        }
    }

    fn insert_clean(&self, hash: ContentHash, bytes: Bytes) {
        let len = bytes.len() as u64;
        let tick = self.tick();
        let mut shard = self.shard(&hash).lock();
        if let Some(entry) = shard.get_mut(&hash) {
            entry.tick = tick;
            return;
        }
        shard.put(hash, CleanEntry { bytes, tick });
        self.clean_bytes.fetch_add(len, Ordering::Relaxed);
        self.clean_entries.fetch_add(1, Ordering::Relaxed);
        Counters::bump(&self.counters.inserts);
    }

    fn persist(&self, hash: &ContentHash, bytes: Bytes) {
        if let Some(disk) = &self.disk {
            disk.store(hash, bytes);
        }
    }

    /// Wait until queued disk tier writes have landed
    pub fn sync_disk(&self) {
        if let Some(disk) = &self.disk {
            disk.sync();
        }
    }

    /// Release one pin after a successful commit.
    ///
    /// When the last pin goes the entry becomes clean and evictable.
    pub fn mark_clean(&self, hash: &ContentHash) {
        let mut dirty = self.dirty.write();
        let Some(entry) = dirty.get_mut(hash) else {
            return;
        };
        entry.pins = entry.pins.saturating_sub(1);
        if entry.pins > 0 {
            return;
        }
        let bytes = entry.bytes.clone();
        // Insert into the clean set before dropping the dirty entry, under
        // the dirty lock, so a concurrent `get` always finds one of them.
        self.insert_clean(*hash, bytes.clone());
        dirty.remove(hash);
        self.dirty_bytes
            .fetch_sub(bytes.len() as u64, Ordering::Relaxed);
        drop(dirty);
        self.persist(hash, bytes);
        self.evict_if_needed();
    }

    /// Release one pin without committing.
    ///
    /// When the last pin goes the uncommitted bytes are dropped.
    pub fn discard(&self, hash: &ContentHash) {
        let mut dirty = self.dirty.write();
        let Some(entry) = dirty.get_mut(hash) else {
            return;
        };
        entry.pins = entry.pins.saturating_sub(1);
        if entry.pins == 0 {
            if let Some(entry) = dirty.remove(hash) {
                self.dirty_bytes
                    .fetch_sub(entry.bytes.len() as u64, Ordering::Relaxed);
            }
        }
    }

    /// Drop a clean entry from memory.
    pub fn invalidate(&self, hash: &ContentHash) {
        if let Some(entry) = self.shard(hash).lock().pop(hash) {
            self.clean_bytes
                .fetch_sub(entry.bytes.len() as u64, Ordering::Relaxed);
            self.clean_entries.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn over_budget(&self) -> bool {
        let bytes =
            self.clean_bytes.load(Ordering::Relaxed) + self.dirty_bytes.load(Ordering::Relaxed);
        if bytes > self.max_bytes {
            return true;
        }
        match self.max_entries {
            Some(max) => {
                let entries = self.clean_entries.load(Ordering::Relaxed)
                    + self.dirty.read().len() as u64;
                entries > max
            }
            None => false,
        }
    }

    /// Evict least recently used clean entries until the cache fits its
    /// budget. Returns the number of entries evicted.
    pub fn evict_if_needed(&self) -> usize {
        let _guard = self.evicting.lock();
        let mut evicted = 0;
        while self.over_budget() {
            // oldest tail across all shards
            let victim = self
                .shards
                .iter()
                .enumerate()
                .filter_map(|(idx, shard)| {
                    shard
                        .lock()
                        .peek_lru()
                        .map(|(hash, entry)| (entry.tick, idx, *hash))
                })
                .min();
            let Some((tick, idx, hash)) = victim else {
                // only dirty entries left
                break;
            };

            let mut shard = self.shards[idx].lock();
            let still_oldest = shard
                .peek_lru()
                .map(|(h, e)| *h == hash && e.tick == tick)
                .unwrap_or(false);
            if !still_oldest {
                continue;
            }
            if let Some((_, entry)) = shard.pop_lru() {
                self.clean_bytes
                    .fetch_sub(entry.bytes.len() as u64, Ordering::Relaxed);
                self.clean_entries.fetch_sub(1, Ordering::Relaxed);
                Counters::bump(&self.counters.evictions);
                evicted += 1;
                tracing::trace!(chunk = %hash.short(), "evicted clean chunk");
            }
        }
        evicted
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.dirty.read().contains_key(hash) || self.shard(hash).lock().contains(hash)
    }

    pub fn is_dirty(&self, hash: &ContentHash) -> bool {
        self.dirty.read().contains_key(hash)
    }

    pub fn stats(&self) -> CacheStats {
        let (dirty_entries, dirty_bytes) = {
            let dirty = self.dirty.read();
            (dirty.len() as u64, self.dirty_bytes.load(Ordering::Relaxed))
        };
        let clean_entries = self.clean_entries.load(Ordering::Relaxed);
        CacheStats {
            hits: Counters::load(&self.counters.hits),
            misses: Counters::load(&self.counters.misses),
            disk_hits: Counters::load(&self.counters.disk_hits),
            inserts: Counters::load(&self.counters.inserts),
            evictions: Counters::load(&self.counters.evictions),
            entries: clean_entries + dirty_entries,
            dirty_entries,
            used_bytes: self.clean_bytes.load(Ordering::Relaxed) + dirty_bytes,
            dirty_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &str) -> (ContentHash, Bytes) {
        let bytes = Bytes::from(tag.as_bytes().to_vec());
        (ContentHash::of(&bytes), bytes)
    }

    #[test]
    fn test_lru_evicts_least_recent_clean_entry() {
        let cache = LocalCache::new(1 << 20, Some(3));
        let (x, xb) = chunk("x");
        let (y, yb) = chunk("y");
        let (z, zb) = chunk("z");
        let (w, wb) = chunk("w");

        cache.put(x, xb, false).unwrap();
        cache.put(y, yb, false).unwrap();
        cache.put(z, zb, false).unwrap();
        cache.put(w, wb, false).unwrap();

        assert!(!cache.contains(&x));
        assert!(cache.contains(&y));
        assert!(cache.contains(&z));
        assert!(cache.contains(&w));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = LocalCache::new(1 << 20, Some(3));
        let (x, xb) = chunk("x");
        let (y, yb) = chunk("y");
        let (z, zb) = chunk("z");
        let (w, wb) = chunk("w");

        cache.put(x, xb, false).unwrap();
        cache.put(y, yb, false).unwrap();
        cache.put(z, zb, false).unwrap();
        assert!(cache.get(&x).is_some());
        cache.put(w, wb, false).unwrap();

        assert!(cache.contains(&x));
        assert!(!cache.contains(&y));
    }

    #[test]
    fn test_dirty_entries_are_never_evicted() {
        let cache = LocalCache::new(1 << 20, Some(2));
        let (d, db) = chunk("dirty");
        cache.put(d, db, true).unwrap();

        for i in 0..10 {
            let (h, b) = chunk(&format!("clean-{}", i));
            cache.put(h, b, false).unwrap();
        }
        assert!(cache.is_dirty(&d));
        assert_eq!(&cache.get(&d).unwrap()[..], b"dirty");

        cache.mark_clean(&d);
        assert!(!cache.is_dirty(&d));
        assert!(cache.contains(&d));
    }

    #[test]
    fn test_pins_balance() {
        let cache = LocalCache::new(1 << 20, None);
        let (h, b) = chunk("shared");
        cache.put(h, b, true).unwrap();
        assert!(cache.pin(&h));
        cache.mark_clean(&h);
        assert!(cache.is_dirty(&h));
        cache.discard(&h);
        assert!(!cache.contains(&h));
        assert!(!cache.pin(&h));
    }

    #[test]
    fn test_dirty_budget_is_backpressure() {
        let cache = LocalCache::new(8, None);
        let (a, ab) = chunk("aaaaaa");
        let (b, bb) = chunk("bbbbbb");
        cache.put(a, ab, true).unwrap();
        assert!(matches!(
            cache.put(b, bb, true),
            Err(CacheError::Exhausted { .. })
        ));
        assert!(cache.is_dirty(&a));
    }

    #[test]
    fn test_disk_tier_serves_evicted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(1 << 20, Some(1))
            .with_disk_tier(dir.path(), 1 << 20)
            .unwrap();
        let (a, ab) = chunk("first");
        let (b, bb) = chunk("second");
        cache.put(a, ab, false).unwrap();
        cache.put(b, bb, false).unwrap();
        cache.sync_disk();

        assert_eq!(&cache.get(&a).unwrap()[..], b"first");
        assert_eq!(cache.stats().disk_hits, 1);
    }

    #[test]
    fn test_mark_clean_persists_off_the_lookup_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(1 << 20, None)
            .with_disk_tier(dir.path(), 1 << 20)
            .unwrap();
        let (h, b) = chunk("committed");
        cache.put(h, b, true).unwrap();
        cache.mark_clean(&h);

        // served from memory right away, whatever the writer is doing
        assert_eq!(&cache.get(&h).unwrap()[..], b"committed");
        assert_eq!(cache.stats().disk_hits, 0);

        cache.sync_disk();
        let hex = h.to_hex();
        assert!(dir.path().join(&hex[..2]).join(&hex).exists());

        cache.invalidate(&h);
        assert_eq!(&cache.get(&h).unwrap()[..], b"committed");
        assert_eq!(cache.stats().disk_hits, 1);
    }

    #[test]
    fn test_clean_reads_proceed_while_disk_writes_queue() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(
            LocalCache::new(1 << 24, None)
                .with_disk_tier(dir.path(), 1 << 24)
                .unwrap(),
        );
        let (hot, hot_bytes) = chunk("hot");
        cache.put(hot, hot_bytes, false).unwrap();

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let (h, b) = chunk(&format!("dirty-{}", i));
                    cache.put(h, b, true).unwrap();
                    cache.mark_clean(&h);
                }
            })
        };
        for _ in 0..200 {
            assert_eq!(&cache.get(&hot).unwrap()[..], b"hot");
        }
        writer.join().unwrap();
        cache.sync_disk();
        assert_eq!(cache.stats().dirty_entries, 0);
    }

    #[test]
    fn test_stats() {
        let cache = LocalCache::new(1 << 20, None);
        let (a, ab) = chunk("abc");
        assert!(cache.get(&a).is_none());
        cache.put(a, ab, false).unwrap();
        assert!(cache.get(&a).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.used_bytes, 3);
        assert_eq!(stats.entries, 1);
    }
}
