//! Hashing primitives for HashLedger

use crate::error::ChainError;
use sha2::{Digest, Sha256};

/// A SHA-256 digest. Block hashes, Merkle roots and transaction leaves all use it.
pub type Sha256Hash = [u8; 32];

/// Hash a single byte string.
pub fn sha256(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

/// Hash the concatenation `left ‖ right` without allocating the joined buffer.
pub fn sha256_concat(left: &[u8], right: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Convert a hash to a hex string for display and for the wire.
pub fn hash_to_hex(hash: &Sha256Hash) -> String {
    hex::encode(hash)
}

/// Convert a hex string to a 32-byte hash.
pub fn hash_from_hex(hex_str: &str) -> Result<Sha256Hash, ChainError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ChainError::MalformedMessage(format!("Invalid hex hash: {}", e)))?;
    if bytes.len() != 32 {
        return Err(ChainError::MalformedMessage(format!(
            "Hash must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    bytes
        .try_into()
        .map_err(|_| ChainError::MalformedMessage("Failed to convert bytes into hash".to_string()))
}

/// Shortened hex form used in logs: first 8 bytes.
pub fn short_hex(bytes: &[u8]) -> String {
    let n = bytes.len().min(8);
    hex::encode(&bytes[..n])
}
