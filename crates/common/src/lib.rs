/**
 * Bearer-token validation and the principals
 *  sessions are opened for.
 */
pub mod auth;
/**
 * Bounded cache of decrypted chunks. Clean
 *  entries are evicted LRU, dirty entries stay
 *  pinned until committed or discarded.
 */
pub mod cache;
/**
 * Versioned metadata catalog interface and
 *  an in-memory implementation.
 */
pub mod catalog;
/**
 * Content hashes, file ids and chunk references.
 */
pub mod chunk;
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Session key management and vault key wrapping
 *  - Chunk splitting, sealing and verification
 */
pub mod crypto;
pub mod error;
/**
 * Mount-scoped context tying keys, cache,
 *  sync and the filesystem bridge together.
 */
pub mod session;
/**
 * Content-addressed ciphertext storage interface
 *  and an in-memory implementation.
 */
pub mod store;
/**
 * Reconciles local dirty state with the catalog:
 *  staging, commits, conflicts and retries.
 */
pub mod sync;
/**
 * Filesystem-operation surface over all of the above.
 */
pub mod vfs;

pub mod prelude {
    pub use crate::auth::{AuthProvider, Principal};
    pub use crate::catalog::{EntryKind, FileRecord, MetadataCatalog};
    pub use crate::chunk::{ChunkRef, ContentHash, FileId};
    pub use crate::config::{ConflictPolicy, MountConfig};
    pub use crate::crypto::Secret;
    pub use crate::error::FsError;
    pub use crate::session::Session;
    pub use crate::store::ChunkStore;
    pub use crate::sync::Resolution;
    pub use crate::vfs::{FileAttr, OpenMode, VirtualFilesystemBridge};
}
