use clap::Args;

use common::catalog::EntryKind;
use common::error::FsError;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Directory to list
    #[arg(default_value = "/")]
    pub path: String,

    /// Show size, version and sync state
    #[arg(long, short)]
    pub long: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let listed = session.bridge().readdir(&self.path).await;
        session.unmount().await?;
        let entries = listed?;

        let lines: Vec<String> = entries
            .iter()
            .map(|entry| {
                let name = match entry.kind {
                    EntryKind::Directory => format!("{}/", entry.name),
                    EntryKind::File => entry.name.clone(),
                };
                if self.long {
                    format!(
                        "{:>12}  v{:<5} {}{}",
                        entry.size,
                        entry.version,
                        name,
                        if entry.dirty { "  (unsynced)" } else { "" }
                    )
                } else {
                    name
                }
            })
            .collect();

        Ok(lines.join("\n"))
    }
}
