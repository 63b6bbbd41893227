use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::file_state::OpenFile;

/// How a handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    /// Truncate to zero length on open
    pub truncate: bool,
    /// Every write goes to the current end of file
    pub append: bool,
}

impl OpenMode {
    pub const READ: OpenMode = OpenMode {
        read: true,
        write: false,
        truncate: false,
        append: false,
    };

    pub const WRITE: OpenMode = OpenMode {
        read: false,
        write: true,
        truncate: false,
        append: false,
    };

    pub const READ_WRITE: OpenMode = OpenMode {
        read: true,
        write: true,
        truncate: false,
        append: false,
    };

    /// Decode `open(2)` flags
    pub fn from_flags(flags: i32) -> Self {
        let access = flags & libc::O_ACCMODE;
        Self {
            read: access == libc::O_RDONLY || access == libc::O_RDWR,
            write: access == libc::O_WRONLY || access == libc::O_RDWR,
            truncate: flags & libc::O_TRUNC != 0,
            append: flags & libc::O_APPEND != 0,
        }
    }

    pub fn truncating(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.write || self.truncate
    }
}

/// Lifecycle of an open handle.
///
/// `Open -> (writes) -> Dirty -> Flushing -> Open`, and `Closed` once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Dirty,
    Flushing,
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleState::Open => "open",
            HandleState::Dirty => "dirty",
            HandleState::Flushing => "flushing",
            HandleState::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub(crate) struct Handle {
    pub(crate) fh: u64,
    pub(crate) mode: OpenMode,
    pub(crate) file: Arc<OpenFile>,
    state: Mutex<HandleState>,
}

impl Handle {
    pub(crate) fn new(fh: u64, mode: OpenMode, file: Arc<OpenFile>) -> Self {
        Self {
            fh,
            mode,
            file,
            state: Mutex::new(HandleState::Open),
        }
    }

    pub(crate) fn state(&self) -> HandleState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: HandleState) {
        let mut state = self.state.lock();
        if *state != HandleState::Closed {
            tracing::trace!(fh = self.fh, from = %*state, to = %next, "handle state");
            *state = next;
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("fh", &self.fh)
            .field("mode", &self.mode)
            .field("file", &self.file.id)
            .field("state", &self.state())
            .finish()
    }
}
