use clap::Args;

use common::cache::CacheStats;
use common::error::FsError;
use common::session::Session;
use common::sync::FileSyncStatus;
use common::vfs::FileAttr;
use vaultfs_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Stat {
    /// Path in the vault
    #[arg(default_value = "/")]
    pub path: String,

    /// Read the file through the cache and report cache statistics
    #[arg(long)]
    pub cache: bool,

    /// Print attributes as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

struct Report {
    attr: FileAttr,
    status: FileSyncStatus,
    fingerprint: String,
    cache: Option<CacheStats>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Stat {
    type Error = StatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.session().await?;
        let report = self.report(&session).await;
        session.unmount().await?;
        let report = report?;

        if self.json {
            let mut value = serde_json::to_value(&report.attr)?;
            value["sync"] = serde_json::Value::String(describe(&report.status));
            if let Some(stats) = &report.cache {
                value["cache"] = serde_json::json!({
                    "hits": stats.hits,
                    "misses": stats.misses,
                    "inserts": stats.inserts,
                    "evictions": stats.evictions,
                    "entries": stats.entries,
                    "used_bytes": stats.used_bytes,
                    "dirty_bytes": stats.dirty_bytes,
                });
            }
            return Ok(serde_json::to_string_pretty(&value)?);
        }

        let attr = &report.attr;
        let mut out = format!(
            "Path: {}\n\
             Kind: {:?}\n\
             Id: {}\n\
             Size: {} bytes\n\
             Version: {}\n\
             Content hash: {}\n\
             Modified: {}\n\
             Sync: {}\n\
             Key fingerprint: {}",
            attr.path,
            attr.kind,
            attr.id,
            attr.size,
            attr.version,
            attr.content_hash.short(),
            attr.modified_at.to_rfc3339(),
            describe(&report.status),
            report.fingerprint,
        );
        if let Some(stats) = &report.cache {
            out.push_str(&format!(
                "\nCache: {} hits, {} misses ({:.0}% hit rate), {} inserts, {} evictions\n\
                 Cache usage: {} entries, {} bytes ({} dirty)",
                stats.hits,
                stats.misses,
                stats.hit_rate() * 100.0,
                stats.inserts,
                stats.evictions,
                stats.entries,
                stats.used_bytes,
                stats.dirty_bytes,
            ));
        }
        Ok(out)
    }
}

impl Stat {
    async fn report(&self, session: &Session) -> Result<Report, FsError> {
        let bridge = session.bridge();
        let attr = bridge.getattr(&self.path).await?;
        let status = if attr.is_dir() {
            FileSyncStatus::Clean
        } else {
            bridge.sync_status(&self.path).await?
        };

        let cache = if self.cache {
            if !attr.is_dir() {
                // twice, so the second pass is served from the cache
                super::cat::read_all(session, &self.path).await?;
                super::cat::read_all(session, &self.path).await?;
            }
            Some(session.cache_stats())
        } else {
            None
        };

        Ok(Report {
            attr,
            status,
            fingerprint: session.key_fingerprint()?,
            cache,
        })
    }
}

fn describe(status: &FileSyncStatus) -> String {
    match status {
        FileSyncStatus::Clean => "clean".to_string(),
        FileSyncStatus::Pending { job } => format!("pending (job {})", job),
        FileSyncStatus::Committing { job } => format!("committing (job {})", job),
        FileSyncStatus::Conflicted {
            local_base,
            remote_version,
            ..
        } => format!(
            "conflicted (local base v{}, remote v{})",
            local_base, remote_version
        ),
        FileSyncStatus::Failed { error, .. } => format!("failed: {}", error),
    }
}
