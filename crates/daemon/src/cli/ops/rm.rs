use clap::Args;

use common::catalog::EntryKind;
use common::error::FsError;
use common::vfs::VirtualFilesystemBridge;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// File to remove
    pub path: String,

    /// Remove a directory and everything below it
    #[arg(long, short)]
    pub recursive: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = RmError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let bridge = session.bridge();
        let removed = async {
            let attr = bridge.getattr(&self.path).await?;
            match (attr.is_dir(), self.recursive) {
                (true, true) => remove_tree(bridge, &self.path).await,
                (true, false) => Err(FsError::IsADirectory(self.path.clone())),
                (false, _) => bridge.unlink(&self.path).await.map(|()| 1),
            }
        }
        .await;
        session.unmount().await?;
        let count = removed?;

        Ok(format!("Removed {} ({} entries)", self.path, count))
    }
}

/// Remove a directory bottom-up, returning the number of entries removed.
/// The root directory itself is emptied but kept.
async fn remove_tree(bridge: &VirtualFilesystemBridge, root: &str) -> Result<usize, FsError> {
    let root = match root.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    };
    let mut removed = 0;
    let mut dirs = vec![root.clone()];
    let mut visit = vec![root];

    while let Some(dir) = visit.pop() {
        for entry in bridge.readdir(&dir).await? {
            let child = if dir == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", dir, entry.name)
            };
            match entry.kind {
                EntryKind::Directory => {
                    dirs.push(child.clone());
                    visit.push(child);
                }
                EntryKind::File => {
                    bridge.unlink(&child).await?;
                    removed += 1;
                }
            }
        }
    }

    // parents were pushed before their children
    for dir in dirs.iter().rev().filter(|d| d.as_str() != "/") {
        bridge.rmdir(dir).await?;
        removed += 1;
    }
    Ok(removed)
}
