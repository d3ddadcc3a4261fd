// core.rs splits the chain into construction/append and verification.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
