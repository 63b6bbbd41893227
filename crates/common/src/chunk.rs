//! Content addressing primitives shared by the codec, cache, store and catalog.
//!
//! Every chunk is identified by the BLAKE3 hash of its *plaintext*
//! ([`ChunkRef::hash`]), which is what the [`LocalCache`](crate::cache::LocalCache)
//! keys on. The ciphertext lives in the [`ChunkStore`](crate::store::ChunkStore)
//! under the BLAKE3 hash of the *ciphertext* ([`ChunkRef::storage_key`]), so two
//! files holding the same plaintext under different data keys never collide.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Size of a BLAKE3 digest in bytes
pub const HASH_SIZE: usize = 32;
/// Size of a ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// A BLAKE3 digest used as a content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Hash arbitrary bytes
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, InvalidHash> {
        let bytes = hex::decode(s).map_err(|_| InvalidHash(s.to_string()))?;
        if bytes.len() != HASH_SIZE {
            return Err(InvalidHash(s.to_string()));
        }
        let mut buff = [0u8; HASH_SIZE];
        buff.copy_from_slice(&bytes);
        Ok(Self(buff))
    }

    /// Hash of a file's content: the ordered chunk hashes followed by the size.
    ///
    /// Two files with identical bytes chunked at the same block size always
    /// produce the same content hash.
    pub fn of_chunks<'a>(chunks: impl IntoIterator<Item = &'a ContentHash>, size: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk.as_bytes());
        }
        hasher.update(&size.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct InvalidHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl FromStr for ContentHash {
    type Err = InvalidHash;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Stable identifier of a catalog entry (file or directory).
///
/// The root directory always has the nil id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    pub const ROOT: FileId = FileId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A committed, immutable chunk of a file.
///
/// The nonce is stored alongside the reference so decryption never has to
/// re-derive it from the version the chunk was sealed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// BLAKE3 hash of the plaintext
    pub hash: ContentHash,
    /// Plaintext length in bytes
    pub len: u32,
    /// BLAKE3 hash of the ciphertext, the key in the chunk store
    pub storage_key: ContentHash,
    /// AEAD nonce used to seal this chunk
    pub nonce: [u8; NONCE_SIZE],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_round_trip() {
        let hash = ContentHash::of(b"hello world");
        let parsed: ContentHash = hash.to_hex().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.short().len(), 8);
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(ContentHash::from_hex("zz").is_err());
        assert!(ContentHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_chunk_ref_serializes_hashes_as_hex() {
        let chunk = ChunkRef {
            hash: ContentHash::of(b"a"),
            len: 1,
            storage_key: ContentHash::of(b"b"),
            nonce: [7u8; NONCE_SIZE],
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(&chunk.hash.to_hex()));
        let back: ChunkRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_content_hash_depends_on_order_and_size() {
        let a = ContentHash::of(b"a");
        let b = ContentHash::of(b"b");
        assert_ne!(
            ContentHash::of_chunks([&a, &b], 2),
            ContentHash::of_chunks([&b, &a], 2)
        );
        assert_ne!(
            ContentHash::of_chunks([&a], 1),
            ContentHash::of_chunks([&a], 2)
        );
    }

    #[test]
    fn test_root_id_is_nil() {
        assert!(FileId::ROOT.is_root());
        assert!(!FileId::new().is_root());
    }
}
