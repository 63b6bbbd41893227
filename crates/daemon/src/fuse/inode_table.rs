//! Inode to path mapping for the FUSE filesystem
//!
//! FUSE identifies entries by inode (u64) while the bridge works on paths.
//! Inodes are handed out on first sight of a path and stay stable across
//! renames for the lifetime of the mount.

use std::collections::HashMap;

/// Bidirectional mapping between inodes and vault paths
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    next_inode: u64,
}

impl InodeTable {
    pub const ROOT_INODE: u64 = 1;

    /// Create a new inode table with root directory at inode 1
    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.path_to_inode.insert("/".to_string(), Self::ROOT_INODE);
        table.inode_to_path.insert(Self::ROOT_INODE, "/".to_string());
        table
    }

    /// Get inode for a path, creating one if it doesn't exist
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }

        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Forget a path and everything below it
    pub fn remove_path(&mut self, path: &str) {
        let prefix = format!("{}/", path);
        let doomed: Vec<u64> = self
            .path_to_inode
            .iter()
            .filter(|(p, _)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(_, &ino)| ino)
            .collect();
        for ino in doomed {
            if let Some(p) = self.inode_to_path.remove(&ino) {
                self.path_to_inode.remove(&p);
            }
        }
    }

    /// Move a path and its descendants, keeping their inodes.
    /// Whatever was at the destination is forgotten.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.remove_path(to);

        let prefix = format!("{}/", from);
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let new = format!("{}{}", to, &old[from.len()..]);
            self.path_to_inode.remove(&old);
            self.path_to_inode.insert(new.clone(), ino);
            self.inode_to_path.insert(ino, new);
        }
    }

    /// Join a directory path and an entry name
    pub fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    pub fn parent_path(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
