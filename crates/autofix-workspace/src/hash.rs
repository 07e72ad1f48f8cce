//! Content hashing for the backup blob store

use std::fmt::{self, Display, Formatter};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// A 32-byte Blake3 digest naming one stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash an in-memory buffer
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash a reader to its end
    ///
    /// # Errors
    /// Returns error if reading fails
    pub fn compute_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Hash a file's contents
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or read
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        Self::compute_reader(std::io::BufReader::new(std::fs::File::open(path)?))
    }

    /// First 16 hex characters, for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a content hash
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Wrong number of bytes
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Decoded length
        actual: usize,
    },

    /// Not valid hex
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_and_buffer_agree() {
        let data = vec![7u8; 200_000];
        let a = ContentHash::compute(&data);
        let b = ContentHash::compute_reader(data.as_slice()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_its_own_display() {
        let hash = ContentHash::compute(b"def f(): pass");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert!(hash.to_string().starts_with(&hash.short()));
    }

    #[test]
    fn rejects_short_hex() {
        let err = "abcd".parse::<ContentHash>().unwrap_err();
        assert!(matches!(
            err,
            HashError::InvalidLength {
                expected: 32,
                actual: 2
            }
        ));
    }

    #[test]
    fn serializes_as_hex_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
