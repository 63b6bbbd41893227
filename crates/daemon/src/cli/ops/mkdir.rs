use clap::Args;

use common::error::FsError;
use common::vfs::VirtualFilesystemBridge;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    /// Directory to create
    pub path: String,

    /// Create missing parents, and succeed if the directory exists
    #[arg(long, short)]
    pub parents: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MkdirError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mkdir {
    type Error = MkdirError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let made = if self.parents {
            mkdir_parents(session.bridge(), &self.path).await
        } else {
            session.bridge().mkdir(&self.path).await.map(|_| ())
        };
        session.unmount().await?;
        made?;

        Ok(format!("Created {}", self.path))
    }
}

async fn mkdir_parents(bridge: &VirtualFilesystemBridge, path: &str) -> Result<(), FsError> {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        match bridge.mkdir(&current).await {
            Ok(_) => {}
            Err(FsError::AlreadyExists(_)) => {
                let attr = bridge.getattr(&current).await?;
                if !attr.is_dir() {
                    return Err(FsError::NotADirectory(current));
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
