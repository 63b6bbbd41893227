//! Session key hierarchy
//!
//! ```text
//! master key ──derive──> key-encryption key ──AES-KW──> wrapped vault key (catalog)
//!                                                          │
//!                                         vault key <──────┘
//!                                             │
//!                                      derive(file id)
//!                                             │
//!                                       file data key
//! ```
//!
//! The master key never touches data. The vault key is random, generated once
//! per vault and stored only in wrapped form. File keys are derived on demand
//! and cached for the lifetime of the session.

use std::collections::HashMap;

use aes::cipher::generic_array::GenericArray;
use aes_kw::KekAes256 as Kek;
use parking_lot::RwLock;

use super::secret::{Secret, SecretError, SECRET_SIZE};
use crate::chunk::FileId;

const KEK_CONTEXT: &str = "vaultfs 2024-06 master key-encryption key";
const FILE_KEY_CONTEXT: &str = "vaultfs 2024-06 per-file data key";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The wrapped key failed its integrity check, almost always because
    /// the master key is wrong.
    #[error("failed to unwrap key: wrong master key or corrupted key blob")]
    Unwrap,
    #[error("failed to wrap key")]
    Wrap,
    #[error("vault key has not been unsealed")]
    Sealed,
    #[error("key material has been released")]
    Released,
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

struct KeyMaterial {
    master: Secret,
    /// Built once from the derived key; the cipher state zeroizes on drop
    kek: Kek,
    vault: Option<Secret>,
    file_keys: HashMap<FileId, Secret>,
}

/// Owns all key material for a mounted session.
///
/// Keys are handed out as owned [`Secret`] copies that zeroize on drop;
/// [`SessionKeyManager::release`] wipes everything held here and makes every
/// further call fail with [`KeyError::Released`].
pub struct SessionKeyManager {
    inner: RwLock<Option<KeyMaterial>>,
}

impl std::fmt::Debug for SessionKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyManager")
            .field("released", &self.is_released())
            .finish()
    }
}

impl SessionKeyManager {
    pub fn new(master: Secret) -> Self {
        let kek_key = master.derive(KEK_CONTEXT, &[]);
        let kek = Kek::new(GenericArray::from_slice(kek_key.bytes()));
        Self {
            inner: RwLock::new(Some(KeyMaterial {
                master,
                kek,
                vault: None,
                file_keys: HashMap::new(),
            })),
        }
    }

    /// Generate a fresh vault key and return it wrapped for storage.
    pub fn create_vault(&self) -> Result<Vec<u8>, KeyError> {
        let vault = Secret::generate()?;
        let wrapped = self.wrap(&vault)?;
        let mut guard = self.inner.write();
        let material = guard.as_mut().ok_or(KeyError::Released)?;
        material.vault = Some(vault);
        material.file_keys.clear();
        tracing::debug!("generated new vault key");
        Ok(wrapped)
    }

    /// Unwrap a stored vault key with the master key.
    ///
    /// A failure here means the session must not be mounted.
    pub fn unseal_vault(&self, wrapped: &[u8]) -> Result<(), KeyError> {
        let vault = self.unwrap(wrapped)?;
        let mut guard = self.inner.write();
        let material = guard.as_mut().ok_or(KeyError::Released)?;
        material.vault = Some(vault);
        material.file_keys.clear();
        tracing::debug!("vault key unsealed");
        Ok(())
    }

    /// Deterministically derive the data key for a file.
    pub fn derive_file_key(&self, file_id: &FileId) -> Result<Secret, KeyError> {
        {
            let guard = self.inner.read();
            let material = guard.as_ref().ok_or(KeyError::Released)?;
            if let Some(key) = material.file_keys.get(file_id) {
                return Ok(key.clone());
            }
        }

        let mut guard = self.inner.write();
        let material = guard.as_mut().ok_or(KeyError::Released)?;
        let vault = material.vault.as_ref().ok_or(KeyError::Sealed)?;
        let key = vault.derive(FILE_KEY_CONTEXT, file_id.as_bytes());
        material.file_keys.insert(*file_id, key.clone());
        Ok(key)
    }

    /// Wrap a key with the master-derived key-encryption key (AES-KW).
    pub fn wrap(&self, key: &Secret) -> Result<Vec<u8>, KeyError> {
        let guard = self.inner.read();
        let material = guard.as_ref().ok_or(KeyError::Released)?;
        material
            .kek
            .wrap_vec(key.bytes())
            .map_err(|_| KeyError::Wrap)
    }

    /// Unwrap a key produced by [`SessionKeyManager::wrap`].
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Secret, KeyError> {
        let guard = self.inner.read();
        let material = guard.as_ref().ok_or(KeyError::Released)?;
        let mut bytes = material
            .kek
            .unwrap_vec(wrapped)
            .map_err(|_| KeyError::Unwrap)?;
        if bytes.len() != SECRET_SIZE {
            zeroize::Zeroize::zeroize(&mut bytes);
            return Err(KeyError::Unwrap);
        }
        let secret = Secret::from_slice(&bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(secret?)
    }

    /// Fingerprint of the master key, safe to log or persist
    pub fn master_fingerprint(&self) -> Result<String, KeyError> {
        let guard = self.inner.read();
        let material = guard.as_ref().ok_or(KeyError::Released)?;
        let digest = material.master.keyed_hash(b"vaultfs fingerprint");
        Ok(hex::encode(&digest[..8]))
    }

    /// Zeroize and drop all key material held by this session.
    pub fn release(&self) {
        // Dropping `KeyMaterial` zeroizes every `Secret` in it.
        if self.inner.write().take().is_some() {
            tracing::debug!("session key material released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.read().is_none()
    }
}
