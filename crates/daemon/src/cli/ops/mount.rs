use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use common::error::FsError;
use vaultfs_daemon::fuse::VaultFs;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Local directory to mount the vault on
    pub mountpoint: PathBuf,

    /// Let other users access the mount (needs user_allow_other in fuse.conf)
    #[arg(long)]
    pub allow_other: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("failed to mount at {0}: {1}")]
    SpawnFailed(PathBuf, std::io::Error),
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(std::io::Error),
    #[error("session still referenced after unmount")]
    SessionInUse,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mount {
    type Error = MountError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = Arc::new(ctx.session().await?);
        let fs = VaultFs::new(tokio::runtime::Handle::current(), session.clone());

        let mut options = vec![
            fuser::MountOption::FSName("vaultfs".to_string()),
            fuser::MountOption::AutoUnmount,
        ];
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if !session.bridge().principal().can_write {
            options.push(fuser::MountOption::RO);
        }

        let background = fuser::spawn_mount2(fs, &self.mountpoint, &options)
            .map_err(|e| MountError::SpawnFailed(self.mountpoint.clone(), e))?;
        tracing::info!(mountpoint = %self.mountpoint.display(), "vault mounted, Ctrl-C to unmount");

        let signal = tokio::signal::ctrl_c().await;

        // joining blocks until the kernel session is gone
        if let Err(e) = tokio::task::spawn_blocking(move || background.join()).await {
            tracing::error!(error = %e, "FUSE session thread panicked");
        }
        let session = Arc::try_unwrap(session).map_err(|_| MountError::SessionInUse)?;
        session.unmount().await?;
        signal.map_err(MountError::Signal)?;

        Ok(format!("Unmounted {}", self.mountpoint.display()))
    }
}
