//! Transaction pool error types.

use thiserror::Error;

/// Why a transaction was not admitted to the pool.
///
/// None of these are fatal: the transaction is dropped and the pool keeps
/// serving.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The transaction failed its content check.
    #[error("transaction for tick {tick} failed validity check")]
    InvalidTransaction { tick: u32 },

    /// The target tick is not in the current epoch window.
    #[error("tick {tick} is outside the current epoch window")]
    OutOfWindowTick { tick: u32 },

    /// The target tick already holds its full transaction budget.
    #[error("tick {tick} already holds its full transaction budget")]
    TickFull { tick: u32 },

    /// The pool's arena has no room for the transaction.
    #[error("pool arena full: needed {needed} bytes, {remaining} remaining")]
    ArenaFull { needed: u64, remaining: u64 },
}
