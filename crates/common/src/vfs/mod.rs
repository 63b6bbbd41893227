//! The filesystem-operation surface.
//!
//! [`VirtualFilesystemBridge`] turns path and handle based calls into chunk
//! reads through the cache, read-modify-write of dirty blocks, and sync jobs.
//! Errors come back as [`FsError`](crate::error::FsError), which carries a
//! POSIX errno for mount adapters.

mod attr;
mod bridge;
mod file_state;
mod handle;

pub use attr::{DirListing, FileAttr};
pub use bridge::{Opened, VirtualFilesystemBridge};
pub use handle::{HandleState, OpenMode};
