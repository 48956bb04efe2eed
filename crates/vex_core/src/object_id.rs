//! Object identification: domain-separated BLAKE3 hashes.

use crate::error::{Result, VexError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte BLAKE3 content hash identifying one immutable object.
///
/// The hash is computed over `kind ‖ 0x00 ‖ canonical bytes`, so two
/// objects of different kinds can never collide even when their payloads
/// are byte-identical.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Length of an id in bytes.
    pub const LEN: usize = 32;

    /// Length of an id as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Creates an id from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying hash bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this id as a lowercase 64-char hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the shard prefix (first 2 hex characters).
    ///
    /// The store lays objects out as `cas/{shard}/{remaining 62 hex}`.
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Returns the filename part (remaining 62 hex characters).
    pub fn rest(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Parses an id from a 64-char hex string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` if the string is not exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(VexError::InvalidId(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| VexError::InvalidId(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VexError::InvalidId("invalid length".to_string()))?;

        Ok(Self(arr))
    }

    /// Computes the id for a payload under the given kind tag.
    pub fn for_payload(kind: &str, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_bytes());
        hasher.update(&[0]);
        hasher.update(payload);
        Self::from_bytes(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}...)", &self.as_hex()[..12])
    }
}

// Ids travel inside canonical JSON as plain hex strings.
impl Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
