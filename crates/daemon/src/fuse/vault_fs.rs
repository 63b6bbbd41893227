//! FUSE filesystem over a mounted vault session
//!
//! Implements `fuser::Filesystem` by resolving inodes to paths and calling
//! the bridge. Kernel file handles are bridge handles, so reads, writes and
//! flushes go straight through to the session.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tokio::runtime::Handle;

use common::catalog::EntryKind;
use common::error::FsError;
use common::session::Session;
use common::vfs::{self, OpenMode};

use crate::fuse::inode_table::InodeTable;

/// FUSE filesystem for a mounted vault
pub struct VaultFs {
    /// Tokio runtime handle for async operations
    rt: Handle,
    session: Arc<Session>,
    inodes: InodeTable,
}

impl VaultFs {
    /// Attributes may change under us through other sessions
    const ATTR_TTL: Duration = Duration::from_secs(1);

    pub fn new(rt: Handle, session: Arc<Session>) -> Self {
        Self {
            rt,
            session,
            inodes: InodeTable::new(),
        }
    }

    /// Check if a filename should be filtered (macOS resource forks, etc.)
    fn should_filter(name: &str) -> bool {
        name.starts_with("._") || name == ".DS_Store" || name == ".Spotlight-V100"
    }

    fn make_attr(&self, inode: u64, attr: &vfs::FileAttr) -> FileAttr {
        let (kind, perm) = match attr.kind {
            EntryKind::Directory => (FileType::Directory, 0o755),
            EntryKind::File => (FileType::RegularFile, 0o644),
        };
        // drop write bits for read-only principals
        let perm = if self.session.bridge().principal().can_write {
            perm
        } else {
            perm & 0o555
        };
        let mtime = SystemTime::from(attr.modified_at);

        FileAttr {
            ino: inode,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: self.session.bridge().block_size() as u32,
            flags: 0,
        }
    }

    fn path_of(&self, ino: u64) -> Result<String, i32> {
        self.inodes
            .get_path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent = self.path_of(parent)?;
        Ok(InodeTable::child_path(&parent, name))
    }

    /// Log and map a bridge error to an errno
    fn errno(op: &str, path: &str, err: FsError) -> i32 {
        match &err {
            FsError::NotFound(_) => tracing::trace!(op, path, "not found"),
            _ => tracing::debug!(op, path, error = %err, "fuse op failed"),
        }
        err.errno()
    }
}

impl Filesystem for VaultFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        tracing::info!(
            principal = %self.session.bridge().principal().name,
            "FUSE filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.rt.block_on(self.session.bridge().flush_all()) {
            tracing::error!(error = %e, "flush on unmount failed");
        }
        tracing::info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if name.to_str().is_some_and(Self::should_filter) {
            reply.error(libc::ENOENT);
            return;
        }
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().lookup(&path)) {
            Ok(attr) => {
                let inode = self.inodes.get_or_create(&path);
                reply.entry(&Self::ATTR_TTL, &self.make_attr(inode, &attr), 0);
            }
            Err(e) => reply.error(Self::errno("lookup", &path, e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().getattr(&path)) {
            Ok(attr) => reply.attr(&Self::ATTR_TTL, &self.make_attr(ino, &attr)),
            Err(e) => reply.error(Self::errno("getattr", &path, e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let bridge = self.session.bridge();

        // only size changes are stored; times and modes are derived
        let result = self.rt.block_on(async {
            match size {
                Some(size) => bridge.truncate(&path, size).await,
                None => bridge.getattr(&path).await,
            }
        });
        match result {
            Ok(attr) => reply.attr(&Self::ATTR_TTL, &self.make_attr(ino, &attr)),
            Err(e) => reply.error(Self::errno("setattr", &path, e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let entries = match self.rt.block_on(self.session.bridge().readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => return reply.error(Self::errno("readdir", &path, e)),
        };

        // Build full entry list with . and ..
        let parent_ino = if ino == InodeTable::ROOT_INODE {
            ino
        } else {
            self.inodes.get_or_create(&InodeTable::parent_path(&path))
        };
        let mut all_entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let entry_ino = self
                .inodes
                .get_or_create(&InodeTable::child_path(&path, &entry.name));
            let kind = match entry.kind {
                EntryKind::Directory => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
            };
            all_entries.push((entry_ino, kind, entry.name));
        }

        for (i, (ino, kind, name)) in all_entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        let mode = OpenMode::from_flags(flags);
        match self.rt.block_on(self.session.bridge().open(&path, mode)) {
            Ok(opened) => reply.opened(opened.fh, 0),
            Err(e) => reply.error(Self::errno("open", &path, e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match self.rt.block_on(self.session.bridge().read(fh, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::errno("read", &ino.to_string(), e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match self
            .rt
            .block_on(self.session.bridge().write(fh, offset, data))
        {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(Self::errno("write", &ino.to_string(), e)),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        match self.rt.block_on(self.session.bridge().flush(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("flush", &ino.to_string(), e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.rt.block_on(self.session.bridge().flush(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("fsync", &ino.to_string(), e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.rt.block_on(self.session.bridge().release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("release", &ino.to_string(), e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().create(&path)) {
            Ok(opened) => {
                let inode = self.inodes.get_or_create(&path);
                let attr = self.make_attr(inode, &opened.attr);
                reply.created(&Self::ATTR_TTL, &attr, 0, opened.fh, flags as u32);
            }
            Err(e) => reply.error(Self::errno("create", &path, e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().mkdir(&path)) {
            Ok(attr) => {
                let inode = self.inodes.get_or_create(&path);
                reply.entry(&Self::ATTR_TTL, &self.make_attr(inode, &attr), 0);
            }
            Err(e) => reply.error(Self::errno("mkdir", &path, e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().unlink(&path)) {
            Ok(()) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("unlink", &path, e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.rt.block_on(self.session.bridge().rmdir(&path)) {
            Ok(()) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rmdir", &path, e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (old_path, new_path) = match (self.child_of(parent, name), self.child_of(newparent, newname)) {
            (Ok(old), Ok(new)) => (old, new),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };

        match self
            .rt
            .block_on(self.session.bridge().rename(&old_path, &new_path))
        {
            Ok(_) => {
                self.inodes.rename(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rename", &old_path, e)),
        }
    }

    // Extended attribute stubs - macOS queries these but handles ENOTSUP gracefully
    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(libc::ENOTSUP);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOTSUP);
    }
}
