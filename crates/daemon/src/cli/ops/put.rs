use std::path::{Path, PathBuf};

use clap::Args;
use tokio::io::{AsyncRead, AsyncReadExt};

use common::error::FsError;
use common::session::Session;
use common::vfs::{FileAttr, OpenMode};
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Local file to upload ("-" reads stdin)
    pub source: PathBuf,

    /// Destination path in the vault
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let uploaded = upload(&session, &self.source, &self.path).await;
        let unmounted = session.unmount().await;
        let attr = uploaded?;
        unmounted?;

        Ok(format!(
            "{} -> {} ({} bytes, version {})",
            self.source.display(),
            attr.path,
            attr.size,
            attr.version
        ))
    }
}

async fn upload(session: &Session, source: &Path, path: &str) -> Result<FileAttr, PutError> {
    let read_err = |e| PutError::Read(source.to_path_buf(), e);
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = if source == Path::new("-") {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::fs::File::open(source).await.map_err(read_err)?)
    };

    let bridge = session.bridge();
    let opened = match bridge.create(path).await {
        Ok(opened) => opened,
        Err(FsError::AlreadyExists(_)) => bridge.open(path, OpenMode::WRITE.truncating()).await?,
        Err(e) => return Err(e.into()),
    };

    let block_size = bridge.block_size();
    // commit before the staged data outgrows the cache budget
    let flush_every = (session.config().cache_max_bytes / 2).max(block_size as u64);
    let mut buf = vec![0u8; block_size];
    let mut offset = 0u64;
    let mut unflushed = 0u64;

    let copied: Result<(), PutError> = async {
        loop {
            let n = read_block(&mut reader, &mut buf).await.map_err(read_err)?;
            if n == 0 {
                return Ok(());
            }
            bridge.write(opened.fh, offset, &buf[..n]).await?;
            offset += n as u64;
            unflushed += n as u64;
            if unflushed >= flush_every {
                bridge.flush(opened.fh).await?;
                unflushed = 0;
            }
        }
    }
    .await;
    let released = bridge.release(opened.fh).await;
    copied?;
    released?;

    tracing::debug!(path, bytes = offset, "upload complete");
    Ok(bridge.getattr(path).await?)
}

/// Fill `buf` unless the reader ends first
async fn read_block<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
