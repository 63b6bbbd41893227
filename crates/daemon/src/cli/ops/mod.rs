pub mod cat;
pub mod init;
pub mod ls;
pub mod mkdir;
#[cfg(feature = "fuse")]
pub mod mount;
pub mod mv;
pub mod put;
pub mod rm;
pub mod rmdir;
pub mod stat;
pub mod truncate;
pub mod version;

pub use cat::Cat;
pub use init::Init;
pub use ls::Ls;
pub use mkdir::Mkdir;
#[cfg(feature = "fuse")]
pub use mount::Mount;
pub use mv::Mv;
pub use put::Put;
pub use rm::Rm;
pub use rmdir::Rmdir;
pub use stat::Stat;
pub use truncate::Truncate;
pub use version::Version;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::cli::op::{Op, OpContext};
    use common::error::FsError;

    async fn init_vault(dir: &Path, cache_max_bytes: u64) -> OpContext {
        let ctx = OpContext::new(Some(dir.join("vault")), None);
        Init {
            block_size: Some(1024),
            cache_max_bytes: Some(cache_max_bytes),
            conflict_policy: None,
            chunks_dir: None,
            log_dir: None,
        }
        .execute(&ctx)
        .await
        .unwrap();
        ctx
    }

    fn cat(path: &str) -> Cat {
        Cat {
            path: path.to_string(),
            output: None,
        }
    }

    fn ls(path: &str) -> Ls {
        Ls {
            path: path.to_string(),
            long: false,
        }
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = init_vault(dir.path(), 64 * 1024).await;

        let source = dir.path().join("notes.txt");
        std::fs::write(&source, "hello vault").unwrap();

        Mkdir {
            path: "/docs/2024".to_string(),
            parents: true,
        }
        .execute(&ctx)
        .await
        .unwrap();

        let out = Put {
            source: source.clone(),
            path: "/docs/2024/notes.txt".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(out.contains("11 bytes, version 2"), "{}", out);

        assert_eq!(cat("/docs/2024/notes.txt").execute(&ctx).await.unwrap(), "hello vault");
        assert_eq!(ls("/docs/2024").execute(&ctx).await.unwrap(), "notes.txt");

        Mv {
            from: "/docs/2024/notes.txt".to_string(),
            to: "/docs/notes.txt".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(ls("/docs").execute(&ctx).await.unwrap(), "2024/\nnotes.txt");

        Truncate {
            path: "/docs/notes.txt".to_string(),
            size: 5,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(cat("/docs/notes.txt").execute(&ctx).await.unwrap(), "hello");

        let stat = Stat {
            path: "/docs/notes.txt".to_string(),
            cache: true,
            json: false,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(stat.contains("Size: 5 bytes"), "{}", stat);
        assert!(stat.contains("Sync: clean"), "{}", stat);
        assert!(stat.contains("Cache: 1 hits"), "{}", stat);

        let err = Rm {
            path: "/docs".to_string(),
            recursive: false,
        }
        .execute(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, rm::RmError::Fs(FsError::IsADirectory(_))));

        let out = Rm {
            path: "/docs".to_string(),
            recursive: true,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(out.contains("3 entries"), "{}", out);
        assert_eq!(ls("/").execute(&ctx).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_put_larger_than_cache_budget() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = init_vault(dir.path(), 4096).await;

        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        let source = dir.path().join("big.bin");
        std::fs::write(&source, &data).unwrap();

        Put {
            source: source.clone(),
            path: "/big.bin".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();

        // uploading again overwrites in place
        Put {
            source,
            path: "/big.bin".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();

        let restored = dir.path().join("restored.bin");
        Cat {
            path: "/big.bin".to_string(),
            output: Some(restored.clone()),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), data);

        let json = Stat {
            path: "/big.bin".to_string(),
            cache: false,
            json: true,
        }
        .execute(&ctx)
        .await
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["size"], 20_000);
        assert_eq!(value["sync"], "clean");
    }

    #[tokio::test]
    async fn test_commands_require_init() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(Some(dir.path().to_path_buf()), None);
        let err = ls("/").execute(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ls::LsError::State(vaultfs_daemon::StateError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_version() {
        let ctx = OpContext::new(None, None);
        let out = Version.execute(&ctx).await.unwrap();
        assert!(out.starts_with("vaultfs "));
    }
}
