//! Metadata catalog persisted in SQLite.
//!
//! Entries are rows keyed by file id with a `(parent, name)` uniqueness
//! constraint, so the tree is a flat table walked by name. Every mutation runs
//! in one transaction; renames are therefore atomic to readers. Retained
//! versions and the storage keys they reference live in side tables so
//! `chunk_in_use` is a single indexed lookup.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tokio::sync::Mutex;

use common::catalog::{
    normalize, split_parent, summarize, CatalogError, DirEntry, EntryKind, FileRecord,
    MetadataCatalog, Renamed, VaultHeader, VersionInfo,
};
use common::chunk::{ChunkRef, ContentHash, FileId};

use crate::database::Database;
use crate::error::{catalog_error, Result};

type CatalogResult<T> = std::result::Result<T, CatalogError>;

const ENTRY_COLUMNS: &str =
    "id, parent, name, kind, size, content_hash, version, chunks, modified_at";

/// SQLite-backed [`MetadataCatalog`].
#[derive(Debug)]
pub struct SqliteCatalog {
    db: Database,
    /// Serializes write transactions from this process. SQLite allows one
    /// writer at a time and a deferred transaction that upgrades to a write
    /// can fail with `SQLITE_BUSY` instead of waiting.
    writes: Mutex<()>,
}

/// One `entries` row
#[derive(Debug, Clone)]
struct StoredEntry {
    id: FileId,
    parent: FileId,
    name: String,
    kind: EntryKind,
    size: u64,
    content_hash: ContentHash,
    version: u64,
    chunks: Vec<ChunkRef>,
    modified_at: DateTime<Utc>,
}

impl StoredEntry {
    fn decode(row: &SqliteRow) -> CatalogResult<Self> {
        let text = |column: &str| -> CatalogResult<String> {
            row.try_get::<String, _>(column).map_err(catalog_error)
        };
        let int = |column: &str| -> CatalogResult<u64> {
            row.try_get::<i64, _>(column)
                .map(|v| v as u64)
                .map_err(catalog_error)
        };
        let kind = text("kind")?;
        let chunks = text("chunks")?;
        Ok(Self {
            id: parse(&text("id")?)?,
            parent: parse(&text("parent")?)?,
            name: text("name")?,
            kind: EntryKind::parse(&kind).ok_or_else(|| corrupt("kind", &kind))?,
            size: int("size")?,
            content_hash: parse(&text("content_hash")?)?,
            version: int("version")?,
            chunks: serde_json::from_str(&chunks).map_err(|e| corrupt("chunks", &e.to_string()))?,
            modified_at: parse_time(&text("modified_at")?)?,
        })
    }

    fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn corrupt(column: &str, value: &str) -> CatalogError {
    CatalogError::Backend(format!("corrupt catalog row: {} = {:?}", column, value))
}

fn parse<T: FromStr>(value: &str) -> CatalogResult<T> {
    value.parse().map_err(|_| corrupt("key", value))
}

fn parse_time(value: &str) -> CatalogResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| corrupt("modified_at", value))
}

fn chunks_json(chunks: &[ChunkRef]) -> CatalogResult<String> {
    serde_json::to_string(chunks).map_err(|e| CatalogError::Backend(e.to_string()))
}

impl SqliteCatalog {
    /// Open (or create) a catalog database file.
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Database::new(path).await?;
        Self::init(db).await
    }

    /// A catalog that lives only as long as this value.
    pub async fn in_memory() -> Result<Self> {
        let db = Database::in_memory().await?;
        Self::init(db).await
    }

    async fn init(db: Database) -> Result<Self> {
        let (size, content_hash) = summarize(&[]);
        let root = FileId::ROOT.to_string();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO entries (id, parent, name, kind, size, content_hash, version, chunks, modified_at)
            VALUES (?, ?, '', ?, ?, ?, 1, '[]', ?)
            "#,
        )
        .bind(&root)
        .bind(&root)
        .bind(EntryKind::Directory.as_str())
        .bind(size as i64)
        .bind(content_hash.to_hex())
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await?;

        tracing::debug!("catalog ready");
        Ok(Self {
            db,
            writes: Mutex::new(()),
        })
    }
}

async fn entry(conn: &mut SqliteConnection, id: &FileId) -> CatalogResult<Option<StoredEntry>> {
    let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(catalog_error)?;
    row.as_ref().map(StoredEntry::decode).transpose()
}

async fn child(
    conn: &mut SqliteConnection,
    parent: &FileId,
    name: &str,
) -> CatalogResult<Option<StoredEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM entries WHERE parent = ? AND name = ? AND id != parent",
        ENTRY_COLUMNS
    ))
    .bind(parent.to_string())
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(catalog_error)?;
    row.as_ref().map(StoredEntry::decode).transpose()
}

async fn resolve(conn: &mut SqliteConnection, path: &str) -> CatalogResult<StoredEntry> {
    let path = normalize(path)?;
    let mut current = entry(conn, &FileId::ROOT)
        .await?
        .ok_or_else(|| CatalogError::Backend("catalog has no root".to_string()))?;
    for name in path.split('/').filter(|c| !c.is_empty()) {
        if !current.is_dir() {
            return Err(CatalogError::NotADirectory(path.clone()));
        }
        current = child(conn, &current.id, name)
            .await?
            .ok_or_else(|| CatalogError::NotFound(path.clone()))?;
    }
    Ok(current)
}

/// Resolve the parent directory of `path`, returning it with the final name
async fn resolve_parent(
    conn: &mut SqliteConnection,
    path: &str,
) -> CatalogResult<(StoredEntry, String)> {
    let (parent, name) = split_parent(path)?;
    let parent_entry = resolve(conn, &parent).await?;
    if !parent_entry.is_dir() {
        return Err(CatalogError::NotADirectory(parent));
    }
    Ok((parent_entry, name))
}

async fn path_of(conn: &mut SqliteConnection, stored: &StoredEntry) -> CatalogResult<String> {
    let mut names = Vec::new();
    let mut current = stored.clone();
    while !current.id.is_root() {
        names.push(current.name.clone());
        match entry(conn, &current.parent).await? {
            Some(parent) => current = parent,
            None => break,
        }
    }
    if names.is_empty() {
        return Ok("/".to_string());
    }
    names.reverse();
    Ok(format!("/{}", names.join("/")))
}

async fn record(conn: &mut SqliteConnection, stored: StoredEntry) -> CatalogResult<FileRecord> {
    let path = path_of(conn, &stored).await?;
    Ok(FileRecord {
        id: stored.id,
        parent: stored.parent,
        name: stored.name,
        path,
        kind: stored.kind,
        size: stored.size,
        content_hash: stored.content_hash,
        version: stored.version,
        chunks: stored.chunks,
        modified_at: stored.modified_at,
    })
}

async fn record_by_id(conn: &mut SqliteConnection, id: &FileId) -> CatalogResult<FileRecord> {
    let stored = entry(conn, id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
    record(conn, stored).await
}

/// Append a retained version and the storage keys it references
async fn record_version(
    conn: &mut SqliteConnection,
    id: &FileId,
    info: &VersionInfo,
    chunks: &[ChunkRef],
) -> CatalogResult<()> {
    let file_id = id.to_string();
    sqlx::query(
        r#"
        INSERT INTO versions (file_id, version, size, content_hash, modified_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file_id)
    .bind(info.version as i64)
    .bind(info.size as i64)
    .bind(info.content_hash.to_hex())
    .bind(info.modified_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(catalog_error)?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chunk_refs (file_id, version, storage_key)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&file_id)
        .bind(info.version as i64)
        .bind(chunk.storage_key.to_hex())
        .execute(&mut *conn)
        .await
        .map_err(catalog_error)?;
    }
    Ok(())
}

async fn insert(
    conn: &mut SqliteConnection,
    path: &str,
    kind: EntryKind,
    chunks: Vec<ChunkRef>,
) -> CatalogResult<FileRecord> {
    let (parent, name) = resolve_parent(conn, path).await?;
    if child(conn, &parent.id, &name).await?.is_some() {
        return Err(CatalogError::AlreadyExists(normalize(path)?));
    }

    let id = FileId::new();
    let (size, content_hash) = summarize(&chunks);
    let modified_at = Utc::now();
    sqlx::query(&format!(
        "INSERT INTO entries ({}) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
        ENTRY_COLUMNS
    ))
    .bind(id.to_string())
    .bind(parent.id.to_string())
    .bind(&name)
    .bind(kind.as_str())
    .bind(size as i64)
    .bind(content_hash.to_hex())
    .bind(chunks_json(&chunks)?)
    .bind(modified_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(catalog_error)?;

    if kind == EntryKind::File {
        let info = VersionInfo {
            version: 1,
            size,
            content_hash,
            modified_at,
        };
        record_version(conn, &id, &info, &chunks).await?;
    }
    record_by_id(conn, &id).await
}

/// Delete an entry with its history
async fn detach(conn: &mut SqliteConnection, id: &FileId) -> CatalogResult<()> {
    let id = id.to_string();
    for statement in [
        "DELETE FROM chunk_refs WHERE file_id = ?",
        "DELETE FROM versions WHERE file_id = ?",
        "DELETE FROM entries WHERE id = ?",
    ] {
        sqlx::query(statement)
            .bind(&id)
            .execute(&mut *conn)
            .await
            .map_err(catalog_error)?;
    }
    Ok(())
}

/// Whether `ancestor` is `id` or one of its parents
async fn is_ancestor(
    conn: &mut SqliteConnection,
    ancestor: &FileId,
    id: &FileId,
) -> CatalogResult<bool> {
    let mut current = *id;
    loop {
        if current == *ancestor {
            return Ok(true);
        }
        if current.is_root() {
            return Ok(false);
        }
        match entry(conn, &current).await? {
            Some(stored) => current = stored.parent,
            None => return Ok(false),
        }
    }
}

async fn has_children(conn: &mut SqliteConnection, id: &FileId) -> CatalogResult<bool> {
    let row = sqlx::query("SELECT 1 FROM entries WHERE parent = ? AND id != parent LIMIT 1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(catalog_error)?;
    Ok(row.is_some())
}

impl SqliteCatalog {
    async fn read_conn(&self) -> CatalogResult<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.db.pool().acquire().await.map_err(catalog_error)
    }
}

#[async_trait]
impl MetadataCatalog for SqliteCatalog {
    async fn get_file(&self, path: &str) -> CatalogResult<FileRecord> {
        let mut conn = self.read_conn().await?;
        let stored = resolve(&mut conn, path).await?;
        record(&mut conn, stored).await
    }

    async fn get_by_id(&self, id: &FileId) -> CatalogResult<FileRecord> {
        let mut conn = self.read_conn().await?;
        record_by_id(&mut conn, id).await
    }

    async fn create_file(&self, path: &str, chunks: Vec<ChunkRef>) -> CatalogResult<FileRecord> {
        let _guard = self.writes.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(catalog_error)?;
        let created = insert(&mut tx, path, EntryKind::File, chunks).await?;
        tx.commit().await.map_err(catalog_error)?;
        tracing::debug!(path = %created.path, id = %created.id, "file created");
        Ok(created)
    }

    async fn create_dir(&self, path: &str) -> CatalogResult<FileRecord> {
        let _guard = self.writes.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(catalog_error)?;
        let created = insert(&mut tx, path, EntryKind::Directory, Vec::new()).await?;
        tx.commit().await.map_err(catalog_error)?;
        tracing::debug!(path = %created.path, id = %created.id, "directory created");
        Ok(created)
    }

    async fn update_file(
        &self,
        id: &FileId,
        expected_version: u64,
        chunks: Vec<ChunkRef>,
    ) -> CatalogResult<FileRecord> {
        let _guard = self.writes.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(catalog_error)?;
        let stored = entry(&mut tx, id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        if stored.is_dir() {
            return Err(CatalogError::IsADirectory(id.to_string()));
        }
        if stored.version != expected_version {
            return Err(CatalogError::Conflict {
                id: *id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        let (size, content_hash) = summarize(&chunks);
        let info = VersionInfo {
            version: expected_version + 1,
            size,
            content_hash,
            modified_at: Utc::now(),
        };
        let updated = sqlx::query(
            r#"
            UPDATE entries
            SET size = ?, content_hash = ?, version = ?, chunks = ?, modified_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(size as i64)
        .bind(content_hash.to_hex())
        .bind(info.version as i64)
        .bind(chunks_json(&chunks)?)
        .bind(info.modified_at.to_rfc3339())
        .bind(id.to_string())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(catalog_error)?;
        if updated.rows_affected() != 1 {
            // another process got there first
            let actual = entry(&mut tx, id).await?.map(|e| e.version).unwrap_or(0);
            return Err(CatalogError::Conflict {
                id: *id,
                expected: expected_version,
                actual,
            });
        }
        record_version(&mut tx, id, &info, &chunks).await?;
        let committed = record_by_id(&mut tx, id).await?;
        tx.commit().await.map_err(catalog_error)?;
        tracing::debug!(%id, version = committed.version, "file updated");
        Ok(committed)
    }

    async fn list_dir(&self, path: &str) -> CatalogResult<Vec<DirEntry>> {
        let mut conn = self.read_conn().await?;
        let dir = resolve(&mut conn, path).await?;
        if !dir.is_dir() {
            return Err(CatalogError::NotADirectory(path.to_string()));
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE parent = ? AND id != parent ORDER BY name",
            ENTRY_COLUMNS
        ))
        .bind(dir.id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;
        rows.iter()
            .map(|row| {
                StoredEntry::decode(row).map(|e| DirEntry {
                    name: e.name,
                    id: e.id,
                    kind: e.kind,
                    size: e.size,
                    version: e.version,
                })
            })
            .collect()
    }

    async fn rename(&self, from: &str, to: &str) -> CatalogResult<Renamed> {
        let _guard = self.writes.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(catalog_error)?;
        let source = resolve(&mut tx, from).await?;
        if source.id.is_root() {
            return Err(CatalogError::InvalidPath(from.to_string()));
        }
        let (dest_parent, dest_name) = resolve_parent(&mut tx, to).await?;
        if is_ancestor(&mut tx, &source.id, &dest_parent.id).await? {
            return Err(CatalogError::InvalidPath(format!(
                "cannot move {} into itself",
                from
            )));
        }

        let mut replaced = None;
        if let Some(existing) = child(&mut tx, &dest_parent.id, &dest_name).await? {
            if existing.id == source.id {
                let record = record(&mut tx, source).await?;
                return Ok(Renamed {
                    record,
                    replaced: None,
                });
            }
            match (source.kind, existing.kind) {
                (_, EntryKind::Directory) => {
                    return Err(CatalogError::AlreadyExists(normalize(to)?));
                }
                (EntryKind::Directory, _) => {
                    return Err(CatalogError::NotADirectory(normalize(to)?));
                }
                _ => {
                    let existing_id = existing.id;
                    replaced = Some(record(&mut tx, existing).await?);
                    detach(&mut tx, &existing_id).await?;
                }
            }
        }

        sqlx::query("UPDATE entries SET parent = ?, name = ? WHERE id = ?")
            .bind(dest_parent.id.to_string())
            .bind(&dest_name)
            .bind(source.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(catalog_error)?;
        let moved = record_by_id(&mut tx, &source.id).await?;
        tx.commit().await.map_err(catalog_error)?;
        tracing::debug!(from, to = %moved.path, replaced = replaced.is_some(), "renamed");
        Ok(Renamed {
            record: moved,
            replaced,
        })
    }

    async fn remove(&self, path: &str, kind: EntryKind) -> CatalogResult<FileRecord> {
        let _guard = self.writes.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(catalog_error)?;
        let stored = resolve(&mut tx, path).await?;
        if stored.id.is_root() {
            return Err(CatalogError::InvalidPath(path.to_string()));
        }
        let id = stored.id;
        let removed = record(&mut tx, stored).await?;
        match (kind, removed.kind) {
            (EntryKind::File, EntryKind::Directory) => {
                return Err(CatalogError::IsADirectory(removed.path))
            }
            (EntryKind::Directory, EntryKind::File) => {
                return Err(CatalogError::NotADirectory(removed.path))
            }
            (EntryKind::Directory, EntryKind::Directory) => {
                if has_children(&mut tx, &id).await? {
                    return Err(CatalogError::DirectoryNotEmpty(removed.path));
                }
            }
            (EntryKind::File, EntryKind::File) => {}
        }
        detach(&mut tx, &id).await?;
        tx.commit().await.map_err(catalog_error)?;
        tracing::debug!(path = %removed.path, %id, "removed");
        Ok(removed)
    }

    async fn chunk_in_use(&self, storage_key: &ContentHash) -> CatalogResult<bool> {
        let row = sqlx::query("SELECT 1 FROM chunk_refs WHERE storage_key = ? LIMIT 1")
            .bind(storage_key.to_hex())
            .fetch_optional(self.db.pool())
            .await
            .map_err(catalog_error)?;
        Ok(row.is_some())
    }

    async fn versions(&self, id: &FileId) -> CatalogResult<Vec<VersionInfo>> {
        let mut conn = self.read_conn().await?;
        if entry(&mut conn, id).await?.is_none() {
            return Err(CatalogError::NotFound(id.to_string()));
        }
        let rows = sqlx::query(
            r#"
            SELECT version, size, content_hash, modified_at
            FROM versions
            WHERE file_id = ?
            ORDER BY version
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;
        rows.iter()
            .map(|row| -> CatalogResult<VersionInfo> {
                let content_hash: String = row.try_get("content_hash").map_err(catalog_error)?;
                let modified_at: String = row.try_get("modified_at").map_err(catalog_error)?;
                Ok(VersionInfo {
                    version: row.try_get::<i64, _>("version").map_err(catalog_error)? as u64,
                    size: row.try_get::<i64, _>("size").map_err(catalog_error)? as u64,
                    content_hash: parse(&content_hash)?,
                    modified_at: parse_time(&modified_at)?,
                })
            })
            .collect()
    }

    async fn load_vault_key(&self) -> CatalogResult<Option<VaultHeader>> {
        let row = sqlx::query("SELECT wrapped_key, block_size FROM vault WHERE id = 1")
            .fetch_optional(self.db.pool())
            .await
            .map_err(catalog_error)?;
        row.map(|r| -> CatalogResult<VaultHeader> {
            Ok(VaultHeader {
                wrapped_key: r.try_get("wrapped_key").map_err(catalog_error)?,
                block_size: r.try_get::<i64, _>("block_size").map_err(catalog_error)? as u32,
            })
        })
        .transpose()
    }

    async fn store_vault_key(&self, header: &VaultHeader) -> CatalogResult<()> {
        let _guard = self.writes.lock().await;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO vault (id, wrapped_key, block_size, created_at) VALUES (1, ?, ?, ?)",
        )
        .bind(&header.wrapped_key)
        .bind(header.block_size as i64)
        .bind(Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(catalog_error)?;
        if inserted.rows_affected() == 0 {
            return Err(CatalogError::AlreadyExists("vault key".to_string()));
        }
        tracing::info!(block_size = header.block_size, "vault key stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::chunk::NONCE_SIZE;

    fn chunk(data: &[u8]) -> ChunkRef {
        ChunkRef {
            hash: ContentHash::of(data),
            len: data.len() as u32,
            storage_key: ContentHash::of(&[data, &b"sealed"[..]].concat()),
            nonce: [7; NONCE_SIZE],
        }
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        catalog.create_dir("/docs").await.unwrap();
        let created = catalog
            .create_file("/docs/a.txt", vec![chunk(b"hello")])
            .await
            .unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.path, "/docs/a.txt");
        assert_eq!(created.size, 5);

        let updated = catalog
            .update_file(&created.id, 1, vec![chunk(b"hello"), chunk(b" world")])
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.size, 11);
        assert_eq!(catalog.get_file("/docs/a.txt").await.unwrap(), updated);

        let err = catalog
            .update_file(&created.id, 1, vec![chunk(b"late")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let versions = catalog.versions(&created.id).await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_namespace_errors() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        catalog.create_file("/f", Vec::new()).await.unwrap();

        assert!(matches!(
            catalog.create_file("/f", Vec::new()).await,
            Err(CatalogError::AlreadyExists(_))
        ));
        assert!(matches!(
            catalog.create_dir("/missing/d").await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            catalog.create_file("/f/child", Vec::new()).await,
            Err(CatalogError::NotADirectory(_))
        ));
        assert!(matches!(
            catalog.list_dir("/f").await,
            Err(CatalogError::NotADirectory(_))
        ));
        assert!(matches!(
            catalog.remove("/f", EntryKind::Directory).await,
            Err(CatalogError::NotADirectory(_))
        ));

        catalog.create_dir("/d").await.unwrap();
        catalog.create_file("/d/x", Vec::new()).await.unwrap();
        assert!(matches!(
            catalog.remove("/d", EntryKind::Directory).await,
            Err(CatalogError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            catalog.remove("/d", EntryKind::File).await,
            Err(CatalogError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        for name in ["/c", "/a", "/b"] {
            catalog.create_file(name, Vec::new()).await.unwrap();
        }
        catalog.create_dir("/d").await.unwrap();
        let names: Vec<String> = catalog
            .list_dir("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_rename_replaces_file_and_moves_subtree() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        catalog.create_dir("/src").await.unwrap();
        let moved = catalog
            .create_file("/src/a", vec![chunk(b"a")])
            .await
            .unwrap();
        let victim = catalog
            .create_file("/b", vec![chunk(b"b")])
            .await
            .unwrap();

        let renamed = catalog.rename("/src/a", "/b").await.unwrap();
        assert_eq!(renamed.record.id, moved.id);
        assert_eq!(renamed.record.path, "/b");
        assert_eq!(renamed.replaced.map(|r| r.id), Some(victim.id));
        assert!(!catalog
            .chunk_in_use(&victim.chunks[0].storage_key)
            .await
            .unwrap());
        assert!(catalog
            .chunk_in_use(&moved.chunks[0].storage_key)
            .await
            .unwrap());

        catalog.create_file("/src/deep", Vec::new()).await.unwrap();
        catalog.rename("/src", "/dst").await.unwrap();
        assert_eq!(
            catalog.get_file("/dst/deep").await.unwrap().path,
            "/dst/deep"
        );
        assert!(matches!(
            catalog.rename("/dst", "/dst/inner").await,
            Err(CatalogError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_history_releases_chunks() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        let created = catalog
            .create_file("/f", vec![chunk(b"v1")])
            .await
            .unwrap();
        catalog
            .update_file(&created.id, 1, vec![chunk(b"v2")])
            .await
            .unwrap();
        // superseded versions are still referenced
        assert!(catalog
            .chunk_in_use(&chunk(b"v1").storage_key)
            .await
            .unwrap());

        catalog.remove("/f", EntryKind::File).await.unwrap();
        assert!(!catalog
            .chunk_in_use(&chunk(b"v1").storage_key)
            .await
            .unwrap());
        assert!(!catalog
            .chunk_in_use(&chunk(b"v2").storage_key)
            .await
            .unwrap());
        assert!(matches!(
            catalog.versions(&created.id).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_vault_key_is_write_once() {
        let catalog = SqliteCatalog::in_memory().await.unwrap();
        let header = VaultHeader {
            wrapped_key: b"wrapped".to_vec(),
            block_size: 1024,
        };
        assert_eq!(catalog.load_vault_key().await.unwrap(), None);
        catalog.store_vault_key(&header).await.unwrap();
        let other = VaultHeader {
            wrapped_key: b"other".to_vec(),
            block_size: 4096,
        };
        assert!(matches!(
            catalog.store_vault_key(&other).await,
            Err(CatalogError::AlreadyExists(_))
        ));
        assert_eq!(catalog.load_vault_key().await.unwrap(), Some(header));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");
        let id = {
            let catalog = SqliteCatalog::open(&path).await.unwrap();
            catalog
                .create_file("/kept", vec![chunk(b"kept")])
                .await
                .unwrap()
                .id
        };
        let catalog = SqliteCatalog::open(&path).await.unwrap();
        let record = catalog.get_file("/kept").await.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.chunks, vec![chunk(b"kept")]);
    }
}
