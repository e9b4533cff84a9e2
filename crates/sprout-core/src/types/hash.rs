//! Identity hashes of concrete specs.

use crate::error::{SproutError, SproutResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the abbreviated hash shown in listings and install paths
pub const SHORT_HASH_LEN: usize = 7;

/// A Blake3 digest identifying one concrete spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpecHash {
    bytes: [u8; 32],
}

impl SpecHash {
    /// Create a hash from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Full lowercase hexadecimal form
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Abbreviated form used in paths and listings
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_HASH_LEN);
        hex
    }

    /// Parse the full hexadecimal form
    pub fn from_hex(hex_str: &str) -> SproutResult<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| SproutError::Parse {
            input: hex_str.to_string(),
            message: format!("invalid hash: {}", e),
            position: 0,
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| SproutError::Parse {
            input: hex_str.to_string(),
            message: format!("expected 32 bytes, got {}", b.len()),
            position: 0,
        })?;
        Ok(Self { bytes })
    }

    /// Check if `prefix` abbreviates this hash
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.to_hex().starts_with(&prefix.to_ascii_lowercase())
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SpecHash {
    type Err = SproutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpecHash::from_hex(s)
    }
}

impl TryFrom<String> for SpecHash {
    type Error = SproutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SpecHash::from_hex(&value)
    }
}

impl From<SpecHash> for String {
    fn from(hash: SpecHash) -> Self {
        hash.to_hex()
    }
}
