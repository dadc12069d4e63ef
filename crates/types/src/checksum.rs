//! Chunk checksums using Blake3.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte Blake3 digest identifying a chunk's contents.
///
/// The simulator carries no real payload bytes, so chunk contents are
/// identified by a digest over `(file id, chunk index)`. What matters is
/// that source and destination records agree, that corruption flips the
/// comparison, and that recovery restores it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Size of a checksum in bytes.
    pub const BYTES: usize = 32;

    /// Zero checksum (all bytes 0x00).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Digest a single byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Digest multiple byte slices in order.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Canonical checksum for a chunk of a simulated file.
    pub fn for_chunk(file: &str, chunk_index: u32) -> Self {
        Self::from_parts(&[file.as_bytes(), b"/", &chunk_index.to_le_bytes()])
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Serialized as hex so snapshots stay human-readable.
impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_checksums_are_deterministic() {
        let a = Checksum::for_chunk("report.bin", 3);
        let b = Checksum::for_chunk("report.bin", 3);
        assert_eq!(a, b);
        assert_ne!(a, Checksum::for_chunk("report.bin", 4));
        assert_ne!(a, Checksum::for_chunk("other.bin", 3));
    }

    #[test]
    fn hex_round_trip() {
        let sum = Checksum::from_bytes(b"hello");
        let parsed = Checksum::from_hex(&sum.to_hex()).expect("valid hex");
        assert_eq!(sum, parsed);
        assert!(Checksum::from_hex("abc").is_none());
    }
}
