// core.rs splits chain responsibilities into submodules: block and chain
// state in `chain`, whole-chain checks in `validation`.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
