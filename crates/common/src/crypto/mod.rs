//! Cryptographic primitives for VaultFS
//!
//! - **Key hierarchy**: [`SessionKeyManager`] holds the master key, unseals the
//!   vault key with AES-KW and derives per-file data keys with BLAKE3.
//! - **Content encryption**: [`ChunkCodec`] splits files into fixed-size blocks
//!   and seals each with ChaCha20-Poly1305 under a deterministic nonce.
//! - **Integrity**: every decrypted block is re-hashed and compared with its
//!   content address before it is handed to anyone.

mod codec;
mod keys;
mod secret;

pub use codec::{ChunkCodec, CodecError, SealedChunk, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use keys::{KeyError, SessionKeyManager};
pub use secret::{Secret, SecretError, SECRET_SIZE, TAG_SIZE};
