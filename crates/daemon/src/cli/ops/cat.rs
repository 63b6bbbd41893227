use std::path::PathBuf;

use clap::Args;

use common::error::FsError;
use common::session::Session;
use common::vfs::OpenMode;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// Path in the vault to read
    pub path: String,

    /// Write the plaintext to this local file instead of printing it
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Cat {
    type Error = CatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let read = read_all(&session, &self.path).await;
        let unmounted = session.unmount().await;
        let bytes = read?;
        unmounted?;

        if let Some(output) = &self.output {
            tokio::fs::write(output, &bytes)
                .await
                .map_err(|e| CatError::Write(output.clone(), e))?;
            return Ok(format!(
                "{} -> {} ({} bytes)",
                self.path,
                output.display(),
                bytes.len()
            ));
        }

        // Try to convert to UTF-8 string, or show hex if binary
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let hex = e
                    .as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(format!(
                    "Size: {} bytes\nBinary content (hex): {}",
                    e.as_bytes().len(),
                    hex
                ))
            }
        }
    }
}

pub(crate) async fn read_all(session: &Session, path: &str) -> Result<Vec<u8>, FsError> {
    let bridge = session.bridge();
    let opened = bridge.open(path, OpenMode::READ).await?;
    let piece = bridge.block_size() as u32;

    let mut data = Vec::with_capacity(opened.attr.size as usize);
    let read: Result<(), FsError> = async {
        loop {
            let bytes = bridge.read(opened.fh, data.len() as u64, piece).await?;
            if bytes.is_empty() {
                return Ok(());
            }
            data.extend_from_slice(&bytes);
        }
    }
    .await;
    bridge.release(opened.fh).await?;
    read?;
    Ok(data)
}
