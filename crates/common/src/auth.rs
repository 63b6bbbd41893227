//! Token validation for mounting sessions.
//!
//! A session is opened on behalf of a [`Principal`] obtained from an
//! [`AuthProvider`]. Tokens are never stored in the clear: the static provider
//! keeps SHA-256 hex digests and compares against the digest of the presented
//! token.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("key validation failed: {0}")]
    Key(String),
}

/// An authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    /// Read-only principals may read and list but every mutation is refused
    pub can_write: bool,
}

impl Principal {
    /// Full-access principal used when a session is opened locally without
    /// a token
    pub fn local() -> Self {
        Self {
            id: "local".to_string(),
            name: "local".to_string(),
            can_write: true,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync + std::fmt::Debug + 'static {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// A configured token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub name: String,
    /// SHA-256 hex digest of the token
    pub token_sha256: String,
    #[serde(default = "default_can_write")]
    pub can_write: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_can_write() -> bool {
    true
}

/// Hex SHA-256 digest of a token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validates tokens against a fixed list of hashed entries
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, TokenEntry>,
}

impl StaticTokenProvider {
    pub fn new(entries: impl IntoIterator<Item = TokenEntry>) -> Self {
        let tokens = entries
            .into_iter()
            .map(|e| (e.token_sha256.to_lowercase(), e))
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let digest = hash_token(token);
        let entry = self.tokens.get(&digest).ok_or(AuthError::InvalidToken)?;
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::Expired);
            }
        }
        tracing::debug!(principal = %entry.name, "token validated");
        Ok(Principal {
            id: digest[..16].to_string(),
            name: entry.name.clone(),
            can_write: entry.can_write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, token: &str, can_write: bool) -> TokenEntry {
        TokenEntry {
            name: name.to_string(),
            token_sha256: hash_token(token),
            can_write,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_validate_known_token() {
        let provider = StaticTokenProvider::new([
            entry("alice", "secret-a", true),
            entry("reader", "secret-r", false),
        ]);
        let alice = provider.validate("secret-a").await.unwrap();
        assert_eq!(alice.name, "alice");
        assert!(alice.can_write);
        assert!(!provider.validate("secret-r").await.unwrap().can_write);
    }

    #[tokio::test]
    async fn test_unknown_and_expired_tokens_rejected() {
        let mut expired = entry("old", "stale", true);
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let provider = StaticTokenProvider::new([expired]);
        assert!(matches!(
            provider.validate("nope").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            provider.validate("stale").await,
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        assert_eq!(hash_token("abc").len(), 64);
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
