//! Hashing helpers for content-addressed caching and stable naming.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of a byte slice as lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

/// First 16 hex characters of the SHA-256 hash, for file and resource names.
pub fn short_hash(data: &[u8]) -> String {
    sha256_bytes(data)[..16].to_string()
}
