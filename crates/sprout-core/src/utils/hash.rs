//! Blake3 hashing helpers.

use crate::types::SpecHash;

/// Compute the Blake3 hex digest of data
pub fn blake3_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash an ordered list of canonical lines into a spec identity.
///
/// Lines are newline-terminated before hashing so that `["ab", "c"]` and
/// `["a", "bc"]` differ.
pub fn hash_lines(lines: &[String]) -> SpecHash {
    let mut hasher = blake3::Hasher::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    SpecHash::new(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let hash = blake3_hash(b"hello world");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_lines_boundaries() {
        let a = hash_lines(&["ab".to_string(), "c".to_string()]);
        let b = hash_lines(&["a".to_string(), "bc".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, hash_lines(&["ab".to_string(), "c".to_string()]));
    }
}
