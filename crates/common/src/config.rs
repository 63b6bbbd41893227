//! Mount-time configuration knobs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

pub const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_CACHE_DISK_MAX_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_RETRY_BACKOFF_CEILING_MS: u64 = 5_000;
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SYNC_QUEUE_CAPACITY: usize = 1024;

/// What to do when a commit loses the optimistic-concurrency race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Surface the conflict and keep local changes dirty until the caller
    /// resolves it
    #[default]
    Reject,
    /// Adopt the remote version and save local changes as a side copy
    RemoteWinsWithBackup,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Reject => write!(f, "reject"),
            ConflictPolicy::RemoteWinsWithBackup => write!(f, "remote-wins-with-backup"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(ConflictPolicy::Reject),
            "remote-wins-with-backup" => Ok(ConflictPolicy::RemoteWinsWithBackup),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("block size must be a power of two between {min} and {max} bytes, got {0}", min = MIN_BLOCK_SIZE, max = MAX_BLOCK_SIZE)]
    BlockSize(usize),
    #[error("cache budget of {cache} bytes cannot hold a single {block}-byte block")]
    CacheTooSmall { cache: u64, block: usize },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("retry backoff base ({base}ms) exceeds ceiling ({ceiling}ms)")]
    Backoff { base: u64, ceiling: u64 },
    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Byte budget of the in-memory chunk cache
    pub cache_max_bytes: u64,
    /// Optional entry budget of the in-memory chunk cache
    pub cache_max_entries: Option<usize>,
    /// Directory for the on-disk cache tier
    pub cache_dir: Option<PathBuf>,
    /// Byte budget of the on-disk cache tier
    pub cache_disk_max_bytes: u64,
    pub block_size: usize,
    pub max_retry_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_ceiling_ms: u64,
    pub conflict_policy: ConflictPolicy,
    /// Bound on every single chunk store or catalog call
    pub commit_timeout_ms: u64,
    pub sync_queue_capacity: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            cache_max_entries: None,
            cache_dir: None,
            cache_disk_max_bytes: DEFAULT_CACHE_DISK_MAX_BYTES,
            block_size: DEFAULT_BLOCK_SIZE,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            retry_backoff_ceiling_ms: DEFAULT_RETRY_BACKOFF_CEILING_MS,
            conflict_policy: ConflictPolicy::default(),
            commit_timeout_ms: DEFAULT_COMMIT_TIMEOUT_MS,
            sync_queue_capacity: DEFAULT_SYNC_QUEUE_CAPACITY,
        }
    }
}

impl MountConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(ConfigError::BlockSize(self.block_size));
        }
        if self.cache_max_bytes < self.block_size as u64 {
            return Err(ConfigError::CacheTooSmall {
                cache: self.cache_max_bytes,
                block: self.block_size,
            });
        }
        if self.cache_max_entries == Some(0) {
            return Err(ConfigError::Zero("cache_max_entries"));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Zero("max_retry_attempts"));
        }
        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::Zero("commit_timeout_ms"));
        }
        if self.sync_queue_capacity == 0 {
            return Err(ConfigError::Zero("sync_queue_capacity"));
        }
        if self.retry_backoff_base_ms > self.retry_backoff_ceiling_ms {
            return Err(ConfigError::Backoff {
                base: self.retry_backoff_base_ms,
                ceiling: self.retry_backoff_ceiling_ms,
            });
        }
        Ok(())
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MountConfig::default();
        config.validate().unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = MountConfig {
            block_size: 3000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BlockSize(3000))));

        config.block_size = 4096;
        config.cache_max_bytes = 1024;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CacheTooSmall { .. })
        ));

        config.cache_max_bytes = 1 << 20;
        config.retry_backoff_base_ms = 10_000;
        assert!(matches!(config.validate(), Err(ConfigError::Backoff { .. })));
    }

    #[test]
    fn test_policy_parses_kebab_case() {
        let config: MountConfig =
            serde_json::from_str(r#"{"conflict_policy":"remote-wins-with-backup","block_size":4096}"#)
                .unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::RemoteWinsWithBackup);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert_eq!(
            "reject".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::Reject
        );
        assert!("other".parse::<ConflictPolicy>().is_err());
    }
}
