use clap::Args;

use common::error::FsError;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Truncate {
    /// File to resize
    pub path: String,

    /// New size in bytes; growing pads with zeros
    #[arg(long, short)]
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TruncateError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Truncate {
    type Error = TruncateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let truncated = session.bridge().truncate(&self.path, self.size).await;
        session.unmount().await?;
        truncated?;

        Ok(format!("Truncated {} to {} bytes", self.path, self.size))
    }
}
