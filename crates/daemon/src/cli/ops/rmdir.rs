use clap::Args;

use common::error::FsError;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Rmdir {
    /// Empty directory to remove
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RmdirError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rmdir {
    type Error = RmdirError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let removed = session.bridge().rmdir(&self.path).await;
        session.unmount().await?;
        removed?;

        Ok(format!("Removed {}", self.path))
    }
}
