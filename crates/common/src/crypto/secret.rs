//! Symmetric key material using ChaCha20-Poly1305
//!
//! A [`Secret`] is a 256-bit key that zeroizes itself when dropped. It is
//! used for every layer of the key hierarchy: the master key supplied by the
//! operator, the vault key sealed under it, and the per-file data keys
//! derived from the vault key. Sealing takes an explicit nonce and associated
//! data so callers control nonce derivation.

use std::fmt;

use chacha20poly1305::Key;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use crate::chunk::NONCE_SIZE;

/// Size of a ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid secret size, expected {expected}, got {got}")]
    InvalidSize { expected: usize, got: usize },
    #[error("authentication failed")]
    Authentication,
    #[error("encrypt error")]
    Encrypt,
    #[error("random source unavailable: {0}")]
    Rng(#[from] getrandom::Error),
}

/// A 256-bit symmetric key
///
/// Bytes are wiped on drop. `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using the system RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff)?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(SecretError::InvalidSize {
                expected: SECRET_SIZE,
                got: data.len(),
            });
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        let secret = Self(buff);
        buff.zeroize();
        Ok(secret)
    }

    /// Derive a subkey with BLAKE3's key derivation mode.
    ///
    /// `context` must be a hardcoded, globally unique string.
    pub fn derive(&self, context: &str, material: &[u8]) -> Secret {
        let mut ikm = Vec::with_capacity(SECRET_SIZE + material.len());
        ikm.extend_from_slice(&self.0);
        ikm.extend_from_slice(material);
        let key = Secret(blake3::derive_key(context, &ikm));
        ikm.zeroize();
        key
    }

    /// Keyed BLAKE3 hash of `data` under this secret
    pub fn keyed_hash(&self, data: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.0, data).as_bytes()
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    /// Seal `plaintext` with ChaCha20-Poly1305.
    ///
    /// Output is `ciphertext || tag`. The nonce is not included and must be
    /// unique for this key.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SecretError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| SecretError::Encrypt)
    }

    /// Open a ciphertext produced by [`Secret::seal`].
    ///
    /// Fails with [`SecretError::Authentication`] on a wrong key, nonce,
    /// associated data, or any modified byte.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SecretError> {
        if ciphertext.len() < TAG_SIZE {
            return Err(SecretError::Authentication);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SecretError::Authentication)
    }
}
