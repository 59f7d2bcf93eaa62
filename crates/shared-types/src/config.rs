//! Storage configuration.
//!
//! One value of [`StorageConfig`] fixes every capacity in the ledger core:
//! the tick window per epoch, the number of computors, the per-tick
//! transaction budget, and the byte sizes of the two transaction arena
//! regions. All buffers are allocated once at construction from these
//! numbers and never grow.

use serde::{Deserialize, Serialize};

use crate::transaction::{MAX_INPUT_SIZE, SIGNATURE_SIZE, TX_HEADER_SIZE};

/// Byte offset of the first transaction in an arena.
///
/// Offsets below this value are never handed out, so offset `0` can encode
/// "no transaction in this slot".
pub const FIRST_TICK_TRANSACTION_OFFSET: u64 = 8;

/// Capacities of the ledger core.
///
/// `Default` carries the production values; tests shrink the counts (and may
/// override the arena byte sizes directly) to exercise boundary behavior
/// without gigabyte allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum number of ticks stored for the running epoch.
    pub max_ticks_per_epoch: u32,
    /// Number of trailing ticks carried over on a seamless epoch transition.
    /// Must be smaller than `max_ticks_per_epoch`.
    pub ticks_kept_from_prior_epoch: u32,
    /// Number of computors voting on each tick.
    pub num_computors: u16,
    /// Maximum number of transactions stored per tick.
    pub txs_per_tick: u32,
    /// Arena oversizing divisor: the current-epoch region is sized for
    /// `max_ticks_per_epoch * txs_per_tick` maximum-size transactions divided
    /// by this factor, since real ticks are nowhere near full.
    pub transaction_sparseness: u64,
    /// Byte size of the current-epoch transaction region, including the
    /// reserved prefix below [`FIRST_TICK_TRANSACTION_OFFSET`].
    pub arena_current_size: u64,
    /// Byte size of the previous-epoch transaction region. Must be smaller
    /// than `arena_current_size`.
    pub arena_prev_size: u64,
    /// Number of contract-locals scratch stacks. At least 2, so read-only
    /// function calls can leave the first slot to state writers.
    pub locals_stack_count: usize,
    /// Byte size of each contract-locals scratch stack.
    pub locals_stack_size: usize,
}

impl StorageConfig {
    /// Builds a configuration from the four counts, deriving the arena region
    /// sizes with the sparseness formula.
    pub fn with_counts(
        max_ticks_per_epoch: u32,
        ticks_kept_from_prior_epoch: u32,
        num_computors: u16,
        txs_per_tick: u32,
    ) -> Self {
        let transaction_sparseness = 6;
        let max_tx = Self::max_transaction_size() as u64;
        let arena_current_size = FIRST_TICK_TRANSACTION_OFFSET
            + u64::from(max_ticks_per_epoch) * u64::from(txs_per_tick) * max_tx
                / transaction_sparseness;
        let arena_prev_size = u64::from(ticks_kept_from_prior_epoch)
            * u64::from(txs_per_tick)
            * max_tx
            / transaction_sparseness;
        Self {
            max_ticks_per_epoch,
            ticks_kept_from_prior_epoch,
            num_computors,
            txs_per_tick,
            transaction_sparseness,
            arena_current_size,
            arena_prev_size,
            locals_stack_count: 4,
            locals_stack_size: 32 * 1024 * 1024,
        }
    }

    /// Largest encoded transaction: fixed header, maximum input, signature.
    pub const fn max_transaction_size() -> usize {
        TX_HEADER_SIZE + MAX_INPUT_SIZE + SIGNATURE_SIZE
    }

    /// Number of tick slots held in memory: the full current-epoch window
    /// plus the preserved tail of the previous epoch.
    pub fn tick_slot_count(&self) -> usize {
        (self.max_ticks_per_epoch + self.ticks_kept_from_prior_epoch) as usize
    }

    /// Length of a transaction-offset index covering every tick slot.
    pub fn offsets_len(&self) -> usize {
        self.tick_slot_count() * self.txs_per_tick as usize
    }

    /// Length of the offset index covering only current-epoch tick slots.
    pub fn offsets_len_current_epoch(&self) -> usize {
        self.max_ticks_per_epoch as usize * self.txs_per_tick as usize
    }

    /// Capacity of the digest lookup table: one slot per current-epoch
    /// transaction.
    pub fn digest_index_capacity(&self) -> usize {
        self.max_ticks_per_epoch as usize * self.txs_per_tick as usize
    }

    /// Total arena allocation: current region followed by the previous-epoch
    /// region.
    pub fn arena_total_size(&self) -> u64 {
        self.arena_current_size + self.arena_prev_size
    }

    /// Checks the cross-field requirements that the storage subsystems rely
    /// on. Called once at construction of each subsystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_ticks_per_epoch == 0 || self.txs_per_tick == 0 || self.num_computors == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.ticks_kept_from_prior_epoch >= self.max_ticks_per_epoch {
            return Err(ConfigError::KeptWindowTooLarge {
                kept: self.ticks_kept_from_prior_epoch,
                max: self.max_ticks_per_epoch,
            });
        }
        if self.arena_current_size <= FIRST_TICK_TRANSACTION_OFFSET {
            return Err(ConfigError::ArenaTooSmall {
                size: self.arena_current_size,
            });
        }
        if self.arena_prev_size >= self.arena_current_size {
            return Err(ConfigError::PrevRegionTooLarge {
                prev: self.arena_prev_size,
                current: self.arena_current_size,
            });
        }
        if self.locals_stack_count < 2 {
            return Err(ConfigError::TooFewLocalsStacks {
                count: self.locals_stack_count,
            });
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::with_counts(10_000, 100, 676, 1024)
    }
}

/// A [`StorageConfig`] that cannot back a working storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A count that sizes a mandatory buffer is zero.
    ZeroCapacity,
    /// The preserved tail would not fit inside one epoch window.
    KeptWindowTooLarge { kept: u32, max: u32 },
    /// The current-epoch arena region cannot even hold the reserved prefix.
    ArenaTooSmall { size: u64 },
    /// The previous-epoch region must be strictly smaller than the current.
    PrevRegionTooLarge { prev: u64, current: u64 },
    /// Writer-priority stack reservation needs at least two stacks.
    TooFewLocalsStacks { count: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroCapacity => write!(f, "tick, computor and transaction counts must be non-zero"),
            ConfigError::KeptWindowTooLarge { kept, max } => {
                write!(f, "preserved tick window {} must be smaller than epoch window {}", kept, max)
            }
            ConfigError::ArenaTooSmall { size } => {
                write!(f, "arena current region of {} bytes cannot hold the reserved prefix", size)
            }
            ConfigError::PrevRegionTooLarge { prev, current } => {
                write!(f, "previous-epoch region {} must be smaller than current region {}", prev, current)
            }
            ConfigError::TooFewLocalsStacks { count } => {
                write!(f, "{} locals stacks configured, need at least 2", count)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
