// Thin re-export module: the chain lives in `blockchain/core.rs`, split into
// block/chain management and verification.

pub mod core;
pub use self::core::*;
