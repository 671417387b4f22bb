// Thin re-export module: implementation is in `blockchain/core.rs` so block
// construction and whole-chain validation can live side by side.

pub mod core;
pub use core::*;
