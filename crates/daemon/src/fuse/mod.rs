//! FUSE adapter exposing a mounted vault as a local directory.

pub mod inode_table;
pub mod vault_fs;

pub use inode_table::InodeTable;
pub use vault_fs::VaultFs;
