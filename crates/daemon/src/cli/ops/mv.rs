use clap::Args;

use common::error::FsError;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Mv {
    /// Existing file or directory
    pub from: String,

    /// New path; an existing file there is replaced
    pub to: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MvError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mv {
    type Error = MvError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let renamed = session.bridge().rename(&self.from, &self.to).await;
        session.unmount().await?;
        let attr = renamed?;

        Ok(format!("Moved {} -> {}", self.from, attr.path))
    }
}
