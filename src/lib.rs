//! HashLedger - an append-only, hash-linked transaction ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the chain, genesis and validation
//! - [`transaction`] - Opaque transaction payloads
//! - [`mempool`] - Pending transactions awaiting a block
//! - [`merkle`] - Merkle roots and membership queries
//! - [`ledger`] - Lock-protected shared handle to the chain
//!
//! ## Cryptography
//! - [`crypto`] - SHA-256 and hex helpers
//!
//! ## Networking
//! - [`wire`] - Pipe-delimited block and chain codec
//! - [`protocol`] - Line protocol messages
//! - [`network`] - Listener, dispatcher, broadcast and connect
//! - [`sync`] - Peer registry
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`node`] - Node startup
//! - [`cli`] - Operator console

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod mempool;
pub mod merkle;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod protocol;
pub mod sync;
pub mod wire;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod cli;
pub mod config;
pub mod error;
pub mod node;
