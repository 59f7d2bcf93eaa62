//! Tick storage error types.

use shared_types::config::ConfigError;
use thiserror::Error;

/// The current-epoch arena region has no room for an append.
/// Recoverable: the append is skipped, nothing is mutated.
#[derive(Debug, Clone, Copy, Error)]
#[error("transaction arena full: needed {needed} bytes, {remaining} remaining")]
pub struct ArenaFullError {
    pub needed: u64,
    pub remaining: u64,
}

/// Errors surfaced by the in-memory storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The configuration cannot back a working storage.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The arena had no room for the transaction.
    #[error(transparent)]
    ArenaFull(#[from] ArenaFullError),

    /// The tick is outside every stored window.
    #[error("tick {tick} is outside the stored tick windows")]
    OutOfWindowTick { tick: u32 },

    /// Every transaction slot of the tick is already taken.
    #[error("no free transaction slot left in tick {tick}")]
    TickFull { tick: u32 },

    /// The transaction failed its content check.
    #[error("transaction for tick {tick} failed validity check")]
    InvalidTransaction { tick: u32 },

    /// A computor index beyond the configured computor count.
    #[error("computor index {index} out of range ({count} computors)")]
    InvalidComputor { index: u16, count: u16 },
}

/// A violated storage invariant, found by a full consistency walk.
#[derive(Debug, Clone, Error)]
pub enum ConsistencyError {
    /// The tick windows are not ordered or sized as required.
    #[error("tick window invariant violated: {0}")]
    Window(String),

    /// A stored tick record does not match the slot it occupies.
    #[error("tick {tick}: stored record is inconsistent: {reason}")]
    TickRecord { tick: u32, reason: String },

    /// A stored transaction does not match its offset-index entry.
    #[error("tick {tick} slot {slot}: transaction at offset {offset} is corrupt: {reason}")]
    Transaction {
        tick: u32,
        slot: u32,
        offset: u64,
        reason: String,
    },

    /// The append cursor does not sit at the end of the stored data.
    #[error("arena cursor {cursor} does not match last transaction end {last_end}")]
    Cursor { cursor: u64, last_end: u64 },
}

/// Snapshot save/load failures.
///
/// [`SnapshotError::step_code`] gives the classic numeric step identifier:
/// metadata = 1, transactions = 2, offsets = 3, votes = 4, tick data = 5,
/// tick below epoch start = 6, inconsistent metadata = 7.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// Saving requires at least one completed tick past the epoch start.
    #[error("snapshot requires a tick above the epoch start {tick_begin}, got {tick}")]
    TickNotAboveEpochStart { tick: u32, tick_begin: u32 },

    /// Tick data section failed to transfer completely.
    #[error("tick data section failed: {0}")]
    TickData(String),

    /// Computor votes section failed to transfer completely.
    #[error("computor votes section failed: {0}")]
    Ticks(String),

    /// Transaction offsets section failed to transfer completely.
    #[error("transaction offsets section failed: {0}")]
    TransactionOffsets(String),

    /// Transactions section failed to transfer completely.
    #[error("transactions section failed: {0}")]
    Transactions(String),

    /// Metadata blob failed to transfer completely.
    #[error("metadata failed: {0}")]
    Metadata(String),

    /// The metadata on disk does not describe this storage's epoch window.
    #[error("snapshot metadata inconsistent with this storage: {0}")]
    InconsistentMetadata(String),
}

impl SnapshotError {
    /// Numeric code identifying the failing step.
    pub fn step_code(&self) -> u8 {
        match self {
            SnapshotError::Metadata(_) => 1,
            SnapshotError::Transactions(_) => 2,
            SnapshotError::TransactionOffsets(_) => 3,
            SnapshotError::Ticks(_) => 4,
            SnapshotError::TickData(_) => 5,
            SnapshotError::TickNotAboveEpochStart { .. } => 6,
            SnapshotError::InconsistentMetadata(_) => 7,
        }
    }
}
