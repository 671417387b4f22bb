//! Opaque ledger transactions

use crate::crypto::{sha256, Sha256Hash};
use std::fmt;

/// An immutable opaque payload. Two transactions are the same transaction
/// exactly when their bytes are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Leaf hash used by the Merkle tree.
    pub fn hash(&self) -> Sha256Hash {
        sha256(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&str> for Transaction {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Transaction {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}
