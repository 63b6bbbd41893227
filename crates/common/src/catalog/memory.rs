use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    normalize, split_parent, summarize, CatalogError, DirEntry, EntryKind, FileRecord,
    MetadataCatalog, Renamed, VaultHeader, VersionInfo,
};
use crate::chunk::{ChunkRef, ContentHash, FileId};

/// In-memory metadata catalog.
///
/// All mutations happen under one write lock, which makes every operation
/// (rename included) atomic with respect to concurrent readers. Clones share
/// state, so two sessions can be pointed at the same catalog.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<MemoryCatalogInner>>,
}

#[derive(Debug, Clone)]
struct Entry {
    parent: FileId,
    name: String,
    kind: EntryKind,
    size: u64,
    content_hash: ContentHash,
    version: u64,
    chunks: Vec<ChunkRef>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MemoryCatalogInner {
    /// Arena of every live entry, the root included
    entries: HashMap<FileId, Entry>,
    /// Directory id -> name -> child id
    children: HashMap<FileId, BTreeMap<String, FileId>>,
    /// File id -> committed versions, oldest first
    history: HashMap<FileId, Vec<(VersionInfo, Vec<ChunkRef>)>>,
    vault_key: Option<VaultHeader>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let (size, content_hash) = summarize(&[]);
        let mut entries = HashMap::new();
        entries.insert(
            FileId::ROOT,
            Entry {
                parent: FileId::ROOT,
                name: String::new(),
                kind: EntryKind::Directory,
                size,
                content_hash,
                version: 1,
                chunks: Vec::new(),
                modified_at: Utc::now(),
            },
        );
        let mut children = HashMap::new();
        children.insert(FileId::ROOT, BTreeMap::new());

        Self {
            inner: Arc::new(RwLock::new(MemoryCatalogInner {
                entries,
                children,
                history: HashMap::new(),
                vault_key: None,
            })),
        }
    }
}

impl MemoryCatalogInner {
    fn resolve(&self, path: &str) -> Result<FileId, CatalogError> {
        let path = normalize(path)?;
        let mut current = FileId::ROOT;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            let children = self
                .children
                .get(&current)
                .ok_or_else(|| CatalogError::NotADirectory(path.clone()))?;
            current = *children
                .get(name)
                .ok_or_else(|| CatalogError::NotFound(path.clone()))?;
        }
        Ok(current)
    }

    /// Resolve the parent directory of `path`, returning it with the final name
    fn resolve_parent(&self, path: &str) -> Result<(FileId, String), CatalogError> {
        let (parent, name) = split_parent(path)?;
        let parent_id = self.resolve(&parent)?;
        if !self.children.contains_key(&parent_id) {
            return Err(CatalogError::NotADirectory(parent));
        }
        Ok((parent_id, name))
    }

    fn path_of(&self, id: &FileId) -> String {
        let mut names = Vec::new();
        let mut current = *id;
        while !current.is_root() {
            match self.entries.get(&current) {
                Some(entry) => {
                    names.push(entry.name.as_str());
                    current = entry.parent;
                }
                None => break,
            }
        }
        if names.is_empty() {
            return "/".to_string();
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn record(&self, id: &FileId) -> Result<FileRecord, CatalogError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(FileRecord {
            id: *id,
            parent: entry.parent,
            name: entry.name.clone(),
            path: self.path_of(id),
            kind: entry.kind,
            size: entry.size,
            content_hash: entry.content_hash,
            version: entry.version,
            chunks: entry.chunks.clone(),
            modified_at: entry.modified_at,
        })
    }

    fn insert(
        &mut self,
        path: &str,
        kind: EntryKind,
        chunks: Vec<ChunkRef>,
    ) -> Result<FileId, CatalogError> {
        let (parent, name) = self.resolve_parent(path)?;
        let siblings = self
            .children
            .get_mut(&parent)
            .ok_or_else(|| CatalogError::NotADirectory(path.to_string()))?;
        if siblings.contains_key(&name) {
            return Err(CatalogError::AlreadyExists(normalize(path)?));
        }

        let id = FileId::new();
        siblings.insert(name.clone(), id);
        let (size, content_hash) = summarize(&chunks);
        let modified_at = Utc::now();
        if kind == EntryKind::Directory {
            self.children.insert(id, BTreeMap::new());
        } else {
            self.history.insert(
                id,
                vec![(
                    VersionInfo {
                        version: 1,
                        size,
                        content_hash,
                        modified_at,
                    },
                    chunks.clone(),
                )],
            );
        }
        self.entries.insert(
            id,
            Entry {
                parent,
                name,
                kind,
                size,
                content_hash,
                version: 1,
                chunks,
                modified_at,
            },
        );
        Ok(id)
    }

    /// Whether `ancestor` is `id` or one of its parents
    fn is_ancestor(&self, ancestor: &FileId, id: &FileId) -> bool {
        let mut current = *id;
        loop {
            if current == *ancestor {
                return true;
            }
            if current.is_root() {
                return false;
            }
            match self.entries.get(&current) {
                Some(entry) => current = entry.parent,
                None => return false,
            }
        }
    }

    fn detach(&mut self, id: &FileId) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        if let Some(siblings) = self.children.get_mut(&entry.parent) {
            siblings.remove(&entry.name);
        }
        self.children.remove(id);
        self.history.remove(id);
        Some(entry)
    }
}

#[async_trait]
impl MetadataCatalog for MemoryCatalog {
    async fn get_file(&self, path: &str) -> Result<FileRecord, CatalogError> {
        let inner = self.inner.read();
        let id = inner.resolve(path)?;
        inner.record(&id)
    }

    async fn get_by_id(&self, id: &FileId) -> Result<FileRecord, CatalogError> {
        self.inner.read().record(id)
    }

    async fn create_file(
        &self,
        path: &str,
        chunks: Vec<ChunkRef>,
    ) -> Result<FileRecord, CatalogError> {
        let mut inner = self.inner.write();
        let id = inner.insert(path, EntryKind::File, chunks)?;
        inner.record(&id)
    }

    async fn create_dir(&self, path: &str) -> Result<FileRecord, CatalogError> {
        let mut inner = self.inner.write();
        let id = inner.insert(path, EntryKind::Directory, Vec::new())?;
        inner.record(&id)
    }

    async fn update_file(
        &self,
        id: &FileId,
        expected_version: u64,
        chunks: Vec<ChunkRef>,
    ) -> Result<FileRecord, CatalogError> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        if entry.kind == EntryKind::Directory {
            return Err(CatalogError::IsADirectory(id.to_string()));
        }
        if entry.version != expected_version {
            return Err(CatalogError::Conflict {
                id: *id,
                expected: expected_version,
                actual: entry.version,
            });
        }

        let (size, content_hash) = summarize(&chunks);
        entry.version += 1;
        entry.size = size;
        entry.content_hash = content_hash;
        entry.chunks = chunks.clone();
        entry.modified_at = Utc::now();
        let info = VersionInfo {
            version: entry.version,
            size,
            content_hash,
            modified_at: entry.modified_at,
        };
        inner.history.entry(*id).or_default().push((info, chunks));
        inner.record(id)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, CatalogError> {
        let inner = self.inner.read();
        let id = inner.resolve(path)?;
        let children = inner
            .children
            .get(&id)
            .ok_or_else(|| CatalogError::NotADirectory(path.to_string()))?;
        Ok(children
            .iter()
            .filter_map(|(name, child)| {
                inner.entries.get(child).map(|entry| DirEntry {
                    name: name.clone(),
                    id: *child,
                    kind: entry.kind,
                    size: entry.size,
                    version: entry.version,
                })
            })
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<Renamed, CatalogError> {
        let mut inner = self.inner.write();
        let source = inner.resolve(from)?;
        if source.is_root() {
            return Err(CatalogError::InvalidPath(from.to_string()));
        }
        let (dest_parent, dest_name) = inner.resolve_parent(to)?;
        if inner.is_ancestor(&source, &dest_parent) {
            return Err(CatalogError::InvalidPath(format!(
                "cannot move {} into itself",
                from
            )));
        }

        let source_kind = inner
            .entries
            .get(&source)
            .map(|e| e.kind)
            .ok_or_else(|| CatalogError::NotFound(from.to_string()))?;
        let existing = inner
            .children
            .get(&dest_parent)
            .and_then(|siblings| siblings.get(&dest_name))
            .copied();

        let mut replaced = None;
        if let Some(existing) = existing {
            if existing == source {
                let record = inner.record(&source)?;
                return Ok(Renamed {
                    record,
                    replaced: None,
                });
            }
            let existing_kind = inner.entries.get(&existing).map(|e| e.kind);
            match (source_kind, existing_kind) {
                (_, Some(EntryKind::Directory)) => {
                    return Err(CatalogError::AlreadyExists(normalize(to)?));
                }
                (EntryKind::Directory, _) => {
                    return Err(CatalogError::NotADirectory(normalize(to)?));
                }
                _ => {
                    let record = inner.record(&existing)?;
                    inner.detach(&existing);
                    replaced = Some(record);
                }
            }
        }

        let (old_parent, old_name) = match inner.entries.get(&source) {
            Some(entry) => (entry.parent, entry.name.clone()),
            None => return Err(CatalogError::NotFound(from.to_string())),
        };
        if let Some(siblings) = inner.children.get_mut(&old_parent) {
            siblings.remove(&old_name);
        }
        if let Some(siblings) = inner.children.get_mut(&dest_parent) {
            siblings.insert(dest_name.clone(), source);
        }
        if let Some(entry) = inner.entries.get_mut(&source) {
            entry.parent = dest_parent;
            entry.name = dest_name;
        }

        let record = inner.record(&source)?;
        Ok(Renamed { record, replaced })
    }

    async fn remove(&self, path: &str, kind: EntryKind) -> Result<FileRecord, CatalogError> {
        let mut inner = self.inner.write();
        let id = inner.resolve(path)?;
        if id.is_root() {
            return Err(CatalogError::InvalidPath(path.to_string()));
        }
        let record = inner.record(&id)?;
        match (kind, record.kind) {
            (EntryKind::File, EntryKind::Directory) => {
                return Err(CatalogError::IsADirectory(record.path))
            }
            (EntryKind::Directory, EntryKind::File) => {
                return Err(CatalogError::NotADirectory(record.path))
            }
            (EntryKind::Directory, EntryKind::Directory) => {
                let empty = inner
                    .children
                    .get(&id)
                    .map(|c| c.is_empty())
                    .unwrap_or(true);
                if !empty {
                    return Err(CatalogError::DirectoryNotEmpty(record.path));
                }
            }
            (EntryKind::File, EntryKind::File) => {}
        }
        inner.detach(&id);
        Ok(record)
    }

    async fn chunk_in_use(&self, storage_key: &ContentHash) -> Result<bool, CatalogError> {
        let inner = self.inner.read();
        let live = inner
            .entries
            .values()
            .any(|e| e.chunks.iter().any(|c| c.storage_key == *storage_key));
        let retained = inner.history.values().any(|versions| {
            versions
                .iter()
                .any(|(_, chunks)| chunks.iter().any(|c| c.storage_key == *storage_key))
        });
        Ok(live || retained)
    }

    async fn versions(&self, id: &FileId) -> Result<Vec<VersionInfo>, CatalogError> {
        let inner = self.inner.read();
        if !inner.entries.contains_key(id) {
            return Err(CatalogError::NotFound(id.to_string()));
        }
        Ok(inner
            .history
            .get(id)
            .map(|versions| versions.iter().map(|(info, _)| info.clone()).collect())
            .unwrap_or_default())
    }

    async fn load_vault_key(&self) -> Result<Option<VaultHeader>, CatalogError> {
        Ok(self.inner.read().vault_key.clone())
    }

    async fn store_vault_key(&self, header: &VaultHeader) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        if inner.vault_key.is_some() {
            return Err(CatalogError::AlreadyExists("vault key".to_string()));
        }
        inner.vault_key = Some(header.clone());
        Ok(())
    }
}
