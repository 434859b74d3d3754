// BLAKE3 content hashing
use anyhow::{Context, Result};
use blake3::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a content hash
pub const HASH_LEN: usize = 32;

/// Content hash of a blob, used both as its storage key and its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(Hash);

impl ContentHash {
    /// Hash bytes held in memory
    pub fn from_bytes(data: &[u8]) -> Self {
        ContentHash(blake3::hash(data))
    }

    /// Rebuild a hash from its raw digest, as persisted in the index.
    ///
    /// Returns `None` when the slice is not exactly [`HASH_LEN`] bytes.
    pub fn from_digest(digest: &[u8]) -> Option<Self> {
        let bytes: [u8; HASH_LEN] = digest.try_into().ok()?;
        Some(ContentHash(Hash::from(bytes)))
    }

    /// Hex string without prefix; this is the key used in the content subtree
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Hex string with blake3: prefix
    pub fn to_string_prefixed(&self) -> String {
        format!("blake3:{}", self.to_hex())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_prefixed())
    }
}

impl FromStr for ContentHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("blake3:").unwrap_or(s);

        if hex.len() != HASH_LEN * 2 {
            anyhow::bail!(
                "Invalid content hash length: expected {} hex chars, got {}",
                HASH_LEN * 2,
                hex.len()
            );
        }

        let bytes =
            hex::decode(hex).with_context(|| format!("Failed to decode hex hash: {}", hex))?;

        Self::from_digest(&bytes)
            .with_context(|| format!("Invalid content hash: expected {} bytes", HASH_LEN))
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string_prefixed())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental hash accumulator for streamed content
#[derive(Default)]
pub struct ContentHasher {
    inner: Hasher,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(&self) -> ContentHash {
        ContentHash(self.inner.finalize())
    }
}
