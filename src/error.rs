//! Error types for HashLedger

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Invalid block linkage at index {0}")]
    InvalidBlockLinkage(usize),

    #[error("Invalid block hash at index {0}")]
    InvalidBlockHash(usize),

    #[error("Invalid Merkle root: expected {expected}, got {actual}")]
    InvalidMerkleRoot { expected: String, actual: String },

    #[error("Genesis block does not match the local genesis")]
    GenesisMismatch,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

impl From<hex::FromHexError> for ChainError {
    fn from(err: hex::FromHexError) -> Self {
        ChainError::MalformedMessage(format!("invalid hex: {}", err))
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
