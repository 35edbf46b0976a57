//! Checksum utilities for schema blob integrity

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of a serialized schema file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that a blob matches this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::from_bytes(data).0 == self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let blob = b"\x0a\x09geo.proto";
        assert_eq!(Checksum::from_bytes(blob), Checksum::from_bytes(blob));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(Checksum::from_bytes(b"a.proto"), Checksum::from_bytes(b"b.proto"));
    }

    #[test]
    fn test_checksum_verification() {
        let checksum = Checksum::from_bytes(b"schema");
        assert!(checksum.verify(b"schema"));
        assert!(!checksum.verify(b"different schema"));
        assert_eq!(checksum.as_str().len(), 64);
    }
}
