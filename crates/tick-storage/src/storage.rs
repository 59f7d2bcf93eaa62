//! The tick storage service.
//!
//! Owns every buffer of the subsystem and mediates all access behind its
//! locks:
//!
//! - tick data sits behind one mutex,
//! - computor votes are stored column-major, one column (and one mutex) per
//!   computor, because votes are written per computor,
//! - the transaction arena and the digest table each have their own mutex.
//!
//! Locks never nest: an operation that needs two structures finishes with
//! one before touching the next, so there is no lock order to get wrong.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use shared_crypto::k12_digest;
use shared_types::{Digest, StorageConfig, TickData, TickVote, Transaction, TxOffset};
use tracing::{debug, warn};

use crate::arena::TickTransactionArena;
use crate::digest_index::DigestIndex;
use crate::errors::{ConsistencyError, StorageError};
use crate::snapshot::SnapshotState;

/// Two-epoch storage of tick data, computor votes and tick transactions.
pub struct TickStorage {
    pub(crate) config: StorageConfig,

    // Tick number range of current epoch storage.
    pub(crate) tick_begin: u32,
    pub(crate) tick_end: u32,

    // Tick number range of previous epoch storage.
    pub(crate) old_tick_begin: u32,
    pub(crate) old_tick_end: u32,

    // One TickData slot per stored tick.
    pub(crate) tick_data: Mutex<Box<[TickData]>>,

    // One column of TickVote slots per computor.
    pub(crate) vote_columns: Box<[Mutex<Box<[TickVote]>>]>,

    // Transaction bytes and their per-tick offset index.
    pub(crate) arena: Mutex<TickTransactionArena>,

    // Digest → arena offset, current epoch only.
    pub(crate) digest_index: Mutex<DigestIndex>,

    // Inserts the digest table had to drop because it was full.
    dropped_digest_inserts: AtomicU64,

    pub(crate) snapshot_state: Mutex<SnapshotState>,
}

impl TickStorage {
    /// Allocates all storage buffers, zeroed.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let tick_slots = config.tick_slot_count();
        let tick_data = vec![TickData::empty(); tick_slots].into_boxed_slice();
        let vote_columns = (0..config.num_computors)
            .map(|_| Mutex::new(vec![TickVote::empty(); tick_slots].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let arena = TickTransactionArena::new(config.clone())?;
        let digest_index = DigestIndex::new(config.digest_index_capacity());
        Ok(Self {
            config,
            tick_begin: 0,
            tick_end: 0,
            old_tick_begin: 0,
            old_tick_end: 0,
            tick_data: Mutex::new(tick_data),
            vote_columns,
            arena: Mutex::new(arena),
            digest_index: Mutex::new(digest_index),
            dropped_digest_inserts: AtomicU64::new(0),
            snapshot_state: Mutex::new(SnapshotState::default()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn tick_begin(&self) -> u32 {
        self.tick_begin
    }

    pub fn tick_end(&self) -> u32 {
        self.tick_end
    }

    pub fn old_tick_begin(&self) -> u32 {
        self.old_tick_begin
    }

    pub fn old_tick_end(&self) -> u32 {
        self.old_tick_end
    }

    // =========================================================================
    // TICK WINDOWS
    // =========================================================================

    /// Whether the tick is stored in the current epoch storage.
    pub fn tick_in_current_epoch(&self, tick: u32) -> bool {
        tick >= self.tick_begin && tick < self.tick_end
    }

    /// Whether the tick is stored in the previous epoch storage.
    pub fn tick_in_previous_epoch(&self, tick: u32) -> bool {
        self.old_tick_begin <= tick && tick < self.old_tick_end
    }

    fn tick_index_current(&self, tick: u32) -> usize {
        (tick - self.tick_begin) as usize
    }

    fn tick_index_previous(&self, tick: u32) -> usize {
        (tick - self.old_tick_begin) as usize + self.config.max_ticks_per_epoch as usize
    }

    fn tick_index(&self, tick: u32) -> Option<usize> {
        if self.tick_in_current_epoch(tick) {
            Some(self.tick_index_current(tick))
        } else if self.tick_in_previous_epoch(tick) {
            Some(self.tick_index_previous(tick))
        } else {
            None
        }
    }

    // =========================================================================
    // EPOCH TRANSITION
    // =========================================================================

    /// Begins a new epoch whose first tick is `new_initial_tick`.
    ///
    /// On a seamless transition (the new initial tick lies inside the running
    /// window) the trailing ticks are copied into the previous-epoch slots of
    /// every structure before the current-epoch slots are cleared. The digest
    /// table only ever describes the current epoch, so it is cleared either
    /// way.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        let max_ticks = self.config.max_ticks_per_epoch as usize;
        let seamless = self.tick_begin != 0
            && self.tick_in_current_epoch(new_initial_tick)
            && self.tick_begin < new_initial_tick;

        if seamless {
            self.old_tick_end = new_initial_tick;
            self.old_tick_begin = new_initial_tick
                .saturating_sub(self.config.ticks_kept_from_prior_epoch)
                .max(self.tick_begin);
            let keep_from = self.tick_index_current(self.old_tick_begin);
            let keep_count = (self.old_tick_end - self.old_tick_begin) as usize;

            let tick_data = self.tick_data.get_mut();
            for i in 0..keep_count {
                tick_data[max_ticks + i] = tick_data[keep_from + i].clone();
            }
            for slot in tick_data.iter_mut().take(max_ticks) {
                *slot = TickData::empty();
            }

            for column in self.vote_columns.iter_mut() {
                let column = column.get_mut();
                column.copy_within(keep_from..keep_from + keep_count, max_ticks);
                column[..max_ticks].fill(TickVote::empty());
            }

            debug!(
                old_tick_begin = self.old_tick_begin,
                old_tick_end = self.old_tick_end,
                "tick storage seamless epoch transition"
            );
        } else {
            let tick_data = self.tick_data.get_mut();
            for slot in tick_data.iter_mut() {
                *slot = TickData::empty();
            }
            for column in self.vote_columns.iter_mut() {
                column.get_mut().fill(TickVote::empty());
            }
            self.old_tick_begin = 0;
            self.old_tick_end = 0;
        }

        self.arena.get_mut().begin_epoch(new_initial_tick);
        self.digest_index.get_mut().clear();

        self.tick_begin = new_initial_tick;
        self.tick_end = new_initial_tick + self.config.max_ticks_per_epoch;
    }

    // =========================================================================
    // TICK DATA
    // =========================================================================

    /// Stores the record for a current-epoch tick.
    pub fn set_tick_data(&self, data: TickData) -> Result<(), StorageError> {
        if !self.tick_in_current_epoch(data.tick) {
            return Err(StorageError::OutOfWindowTick { tick: data.tick });
        }
        let index = self.tick_index_current(data.tick);
        self.tick_data.lock()[index] = data;
        Ok(())
    }

    /// Returns the record for a stored tick, `None` when the tick is outside
    /// both windows or its slot was never populated.
    pub fn get_tick_data_if_not_empty(&self, tick: u32) -> Option<TickData> {
        let index = self.tick_index(tick)?;
        let guard = self.tick_data.lock();
        let data = &guard[index];
        if data.is_empty() {
            return None;
        }
        Some(data.clone())
    }

    // =========================================================================
    // COMPUTOR VOTES
    // =========================================================================

    /// Stores one computor's vote on a current-epoch tick.
    pub fn set_tick_vote(&self, vote: TickVote) -> Result<(), StorageError> {
        if vote.computor_index >= self.config.num_computors {
            return Err(StorageError::InvalidComputor {
                index: vote.computor_index,
                count: self.config.num_computors,
            });
        }
        if !self.tick_in_current_epoch(vote.tick) {
            return Err(StorageError::OutOfWindowTick { tick: vote.tick });
        }
        let index = self.tick_index_current(vote.tick);
        self.vote_columns[vote.computor_index as usize].lock()[index] = vote;
        Ok(())
    }

    /// Returns one computor's vote on a stored tick, `None` when unset.
    pub fn get_tick_vote(&self, tick: u32, computor_index: u16) -> Option<TickVote> {
        if computor_index >= self.config.num_computors {
            return None;
        }
        let index = self.tick_index(tick)?;
        let guard = self.vote_columns[computor_index as usize].lock();
        let vote = guard[index];
        if vote.is_empty() {
            return None;
        }
        Some(vote)
    }

    /// Returns the full vote row for a stored tick (empty slots included),
    /// `None` when the tick is outside both windows.
    pub fn tick_votes(&self, tick: u32) -> Option<Vec<TickVote>> {
        let index = self.tick_index(tick)?;
        Some(
            self.vote_columns
                .iter()
                .map(|column| column.lock()[index])
                .collect(),
        )
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Copies a finalized transaction into the arena, indexes it under its
    /// tick, and registers its digest. Returns the arena offset.
    pub fn store_transaction(&self, tx: &Transaction) -> Result<TxOffset, StorageError> {
        if !tx.check_validity() {
            return Err(StorageError::InvalidTransaction { tick: tx.tick });
        }
        let encoded = tx.encode();
        let offset;
        {
            let mut arena = self.arena.lock();
            if !arena.tick_in_current_epoch(tx.tick) {
                return Err(StorageError::OutOfWindowTick { tick: tx.tick });
            }
            let tick_index = arena.tick_index_current(tx.tick);
            let slot = arena
                .find_free_slot(tick_index)
                .ok_or(StorageError::TickFull { tick: tx.tick })?;
            offset = arena.append(&encoded)?;
            arena.set_offset(tick_index, slot, offset);
        }
        self.insert_transaction_digest(k12_digest(&encoded), offset);
        Ok(offset)
    }

    /// Registers a digest → offset mapping in the lookup table.
    pub fn insert_transaction_digest(&self, digest: Digest, offset: TxOffset) {
        let inserted = self.digest_index.lock().insert(digest, offset);
        if !inserted && !digest.is_zero() {
            self.dropped_digest_inserts.fetch_add(1, Ordering::Relaxed);
            warn!(?digest, "digest table full, insert dropped");
        }
    }

    /// Resolves a digest to its transaction, decoding it out of the arena.
    pub fn find_transaction_by_digest(&self, digest: &Digest) -> Option<Transaction> {
        let offset = self.digest_index.lock().find(digest)?;
        let arena = self.arena.lock();
        Some(arena.tx_view(offset)?.to_owned())
    }

    /// Returns the transaction stored at `(tick, slot)`, `None` when absent.
    pub fn transaction_at(&self, tick: u32, tx_slot: usize) -> Option<Transaction> {
        if tx_slot >= self.config.txs_per_tick as usize {
            return None;
        }
        let arena = self.arena.lock();
        let tick_index = arena.tick_index(tick)?;
        let offset = arena.offset_at(tick_index, tx_slot);
        Some(arena.tx_view(offset)?.to_owned())
    }

    /// Returns the arena offset stored for `(tick, slot)`.
    pub fn transaction_offset(&self, tick: u32, tx_slot: usize) -> Option<TxOffset> {
        if tx_slot >= self.config.txs_per_tick as usize {
            return None;
        }
        let arena = self.arena.lock();
        let tick_index = arena.tick_index(tick)?;
        Some(arena.offset_at(tick_index, tx_slot))
    }

    /// How many digest-table inserts were dropped because the table was full.
    pub fn dropped_digest_inserts(&self) -> u64 {
        self.dropped_digest_inserts.load(Ordering::Relaxed)
    }

    // =========================================================================
    // CONSISTENCY
    // =========================================================================

    /// Full walk of both windows validating every stored record against the
    /// slot it occupies. Expensive; meant for tests and debugging.
    pub fn check_state_consistency(&self) -> Result<(), ConsistencyError> {
        let window = |cond: bool, desc: &str| {
            if cond {
                Ok(())
            } else {
                Err(ConsistencyError::Window(desc.to_string()))
            }
        };
        window(self.tick_begin <= self.tick_end, "tick_begin <= tick_end")?;
        window(
            (self.tick_end - self.tick_begin) as usize <= self.config.tick_slot_count(),
            "current window fits the tick slots",
        )?;
        window(
            self.old_tick_begin <= self.old_tick_end,
            "old_tick_begin <= old_tick_end",
        )?;
        window(
            self.old_tick_end - self.old_tick_begin <= self.config.ticks_kept_from_prior_epoch,
            "previous window fits the preserved tail",
        )?;
        window(self.old_tick_end <= self.tick_begin, "old_tick_end <= tick_begin")?;

        let all_ticks = (self.old_tick_begin..self.old_tick_end).chain(self.tick_begin..self.tick_end);
        for tick in all_ticks {
            let Some(index) = self.tick_index(tick) else {
                continue;
            };

            {
                let guard = self.tick_data.lock();
                let data = &guard[index];
                if !(data.is_empty() || data.tick == tick) {
                    return Err(ConsistencyError::TickRecord {
                        tick,
                        reason: format!("tick data slot holds tick {}", data.tick),
                    });
                }
            }

            for (computor, column) in self.vote_columns.iter().enumerate() {
                let vote = column.lock()[index];
                if !(vote.is_empty()
                    || (vote.tick == tick && vote.computor_index as usize == computor))
                {
                    return Err(ConsistencyError::TickRecord {
                        tick,
                        reason: format!(
                            "vote column {} holds tick {} computor {}",
                            computor, vote.tick, vote.computor_index
                        ),
                    });
                }
            }
        }

        self.arena.lock().check_consistency()
    }
}
