//! # Shared Types Crate
//!
//! Domain entities shared by every subsystem of the tick ledger: the
//! variable-size [`Transaction`] record and its zero-copy [`TxView`], the
//! per-computor [`TickVote`], the per-tick [`TickData`], and the
//! [`StorageConfig`] that fixes every capacity in the system.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every buffer size, window length, and slot
//!   count is derived from one [`StorageConfig`] value.
//! - **Explicit Byte Layouts**: everything that can land in a snapshot file
//!   encodes to a fixed little-endian layout via its own `encode_into` /
//!   `decode` pair. Serde derives exist for API consumers; the on-disk format
//!   never goes through them.
//! - **Typed Offsets**: positions inside a transaction arena are [`TxOffset`]
//!   values, never bare integers; offset zero encodes "absent".

pub mod config;
pub mod entities;
pub mod transaction;

pub use config::StorageConfig;
pub use entities::{Digest, PublicKey, Signature, TickData, TickVote, TxOffset};
pub use transaction::{Transaction, TxView, MAX_AMOUNT, MAX_INPUT_SIZE, TX_HEADER_SIZE};
