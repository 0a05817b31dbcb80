//! # Hashing
//!
//! SHA-256 is the only hash function this crate uses. Block hashes,
//! transaction hashes, and gossip identifiers are all `sha256` of an ASCII
//! serialisation — one function, used everywhere, so two nodes never
//! disagree about what a given byte string hashes to.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// Returns a 32-byte digest as a `Vec<u8>`. For call sites that want a
/// fixed-size array instead, use [`sha256_array`].
///
/// # Example
///
/// ```
/// use meshchain_protocol::crypto::sha256;
///
/// let hash = sha256(b"meshchain");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Compute the SHA-256 hash and return a fixed-size array.
///
/// Same as [`sha256`] but without the heap allocation, for hot paths
/// (block mining) where the array type propagates naturally.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Lowercase hex encoding of a SHA-256 digest, the form used throughout the
/// wire protocol and the persistent store's namespace keys.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_array(data))
}

/// Returns `true` if `hash_hex` (a lowercase hex digest) begins with
/// `prefix_len` ASCII `'0'` characters — the difficulty check every
/// candidate block must pass before it can be confirmed.
pub fn meets_difficulty(hash_hex: &str, prefix_len: usize) -> bool {
    hash_hex.as_bytes().iter().take(prefix_len).all(|&b| b == b'0')
        && hash_hex.len() >= prefix_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string — the canonical test vector.
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn sha256_deterministic() {
        let a = sha256(b"meshchain");
        let b = sha256(b"meshchain");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn sha256_array_matches_vec() {
        let vec_result = sha256(b"test data");
        let arr_result = sha256_array(b"test data");
        assert_eq!(vec_result.as_slice(), arr_result.as_slice());
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        let hex = sha256_hex(b"meshchain");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn meets_difficulty_checks_leading_zeros() {
        assert!(meets_difficulty("000000abcdef", 6));
        assert!(!meets_difficulty("00000abcdef1", 6));
        assert!(meets_difficulty("0000001", 6));
    }

    #[test]
    fn meets_difficulty_handles_short_strings() {
        assert!(!meets_difficulty("0000", 6));
    }
}
