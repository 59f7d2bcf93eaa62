//! # Shared Crypto Crate
//!
//! Transaction digests for the tick ledger.

pub mod hashing;

pub use hashing::{k12_digest, K12Hasher};
