//! The pending transaction pool.

use parking_lot::Mutex;
use shared_crypto::k12_digest;
use shared_types::{Digest, StorageConfig, Transaction, TxOffset};
use tick_storage::arena::TickTransactionArena;
use tick_storage::errors::StorageError;
use tracing::debug;

use crate::errors::PoolError;

/// Deduplication-friendly staging pool of pending transactions.
///
/// Lock order is fixed: saved counts, then digests, then the arena. Every
/// path that takes more than one of the three acquires them in that order,
/// and guards drop together at the end of the operation.
pub struct TxsPool {
    config: StorageConfig,

    // Saved transactions per tick slot. Consumers index `0..count`.
    counts: Mutex<Box<[u32]>>,

    // One digest per (tick slot, transaction slot), aligned with the arena's
    // offset rows.
    digests: Mutex<Box<[Digest]>>,

    // Transaction bytes and offset rows, private to the pool.
    arena: Mutex<TickTransactionArena>,
}

impl TxsPool {
    /// Allocates the pool's buffers, zeroed.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let counts = vec![0u32; config.tick_slot_count()].into_boxed_slice();
        let digests = vec![Digest::ZERO; config.offsets_len()].into_boxed_slice();
        let arena = TickTransactionArena::new(config.clone())?;
        Ok(Self {
            config,
            counts: Mutex::new(counts),
            digests: Mutex::new(digests),
            arena: Mutex::new(arena),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Validates a transaction and stages it for its target tick.
    ///
    /// The transaction is hashed with KangarooTwelve, its bytes are appended
    /// to the pool arena, and the tick's saved count grows by one. Rejections
    /// leave the pool untouched.
    pub fn add(&self, tx: &Transaction) -> Result<(), PoolError> {
        if !tx.check_validity() {
            return Err(PoolError::InvalidTransaction { tick: tx.tick });
        }

        let mut counts = self.counts.lock();
        let mut digests = self.digests.lock();
        let mut arena = self.arena.lock();

        if !arena.tick_in_current_epoch(tx.tick) {
            return Err(PoolError::OutOfWindowTick { tick: tx.tick });
        }
        let tick_index = arena.tick_index_current(tx.tick);
        let saved = counts[tick_index] as usize;
        if saved >= self.config.txs_per_tick as usize {
            return Err(PoolError::TickFull { tick: tx.tick });
        }

        let encoded = tx.encode();
        let offset = arena.append(&encoded).map_err(|err| {
            debug!(
                tick = tx.tick,
                needed = err.needed,
                remaining = err.remaining,
                "pool arena full, transaction dropped"
            );
            PoolError::ArenaFull {
                needed: err.needed,
                remaining: err.remaining,
            }
        })?;

        debug_assert!(arena.offset_at(tick_index, saved).is_absent());
        arena.set_offset(tick_index, saved, offset);
        digests[tick_index * self.config.txs_per_tick as usize + saved] = k12_digest(&encoded);
        counts[tick_index] = saved as u32 + 1;
        Ok(())
    }

    /// Number of staged transactions for one tick; 0 outside both windows.
    pub fn get_number_of_tick_txs(&self, tick: u32) -> u32 {
        let counts = self.counts.lock();
        let arena = self.arena.lock();
        match arena.tick_index(tick) {
            Some(tick_index) => counts[tick_index],
            None => 0,
        }
    }

    /// Number of staged transactions scheduled strictly later than `tick`.
    ///
    /// A tick below everything the pool knows about counts the whole pool.
    pub fn get_number_of_pending_txs(&self, tick: u32) -> u32 {
        let counts = self.counts.lock();
        let arena = self.arena.lock();

        let tick_begin = arena.tick_begin();
        let tick_end = arena.tick_end();
        let old_tick_begin = arena.old_tick_begin();
        let old_tick_end = arena.old_tick_end();

        let mut start_tick = tick_end;
        let mut old_start_tick = old_tick_end;
        if tick < old_tick_begin || (old_tick_begin == 0 && tick < tick_begin) {
            // Everything stored is later.
            start_tick = tick_begin;
            old_start_tick = old_tick_begin;
        } else if arena.tick_in_previous_epoch(tick) {
            start_tick = tick_begin;
            old_start_tick = tick + 1;
        } else if arena.tick_in_current_epoch(tick) {
            start_tick = tick + 1;
        }

        let mut pending = 0;
        for t in start_tick..tick_end {
            pending += counts[arena.tick_index_current(t)];
        }
        for t in old_start_tick..old_tick_end {
            pending += counts[arena.tick_index_previous(t)];
        }
        pending
    }

    /// Staged transaction `index` of a tick, `None` past the saved count.
    pub fn get(&self, tick: u32, index: usize) -> Option<Transaction> {
        let counts = self.counts.lock();
        let arena = self.arena.lock();
        let tick_index = arena.tick_index(tick)?;
        if index >= counts[tick_index] as usize {
            return None;
        }
        let offset = arena.offset_at(tick_index, index);
        debug_assert!(!offset.is_absent());
        Some(arena.tx_view(offset)?.to_owned())
    }

    /// Digest of staged transaction `index` of a tick.
    pub fn get_digest(&self, tick: u32, index: usize) -> Option<Digest> {
        let counts = self.counts.lock();
        let digests = self.digests.lock();
        let arena = self.arena.lock();
        let tick_index = arena.tick_index(tick)?;
        if index >= counts[tick_index] as usize {
            return None;
        }
        Some(digests[tick_index * self.config.txs_per_tick as usize + index])
    }

    /// Begins a new epoch whose first tick is `new_initial_tick`.
    ///
    /// On a seamless transition the counts and digests of the preserved
    /// trailing ticks move into the previous-epoch slots alongside the arena
    /// relocation. The arena may truncate the oldest preserved bytes, so
    /// each preserved tick is then compacted: surviving offsets and digests
    /// become dense from slot 0 and the count shrinks to match.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        let max_ticks = self.config.max_ticks_per_epoch as usize;
        let txs_per_tick = self.config.txs_per_tick as usize;

        let counts = self.counts.get_mut();
        let digests = self.digests.get_mut();
        let arena = self.arena.get_mut();

        let seamless = arena.tick_begin() != 0
            && arena.tick_in_current_epoch(new_initial_tick)
            && arena.tick_begin() < new_initial_tick;

        let mut preserved = 0;
        if seamless {
            let old_tick_begin = new_initial_tick
                .saturating_sub(self.config.ticks_kept_from_prior_epoch)
                .max(arena.tick_begin());
            let keep_from = arena.tick_index_current(old_tick_begin);
            preserved = (new_initial_tick - old_tick_begin) as usize;

            digests.copy_within(
                keep_from * txs_per_tick..(keep_from + preserved) * txs_per_tick,
                max_ticks * txs_per_tick,
            );
            counts.copy_within(keep_from..keep_from + preserved, max_ticks);
            digests[..max_ticks * txs_per_tick].fill(Digest::ZERO);
            counts[..max_ticks].fill(0);
        } else {
            digests.fill(Digest::ZERO);
            counts.fill(0);
        }

        arena.begin_epoch(new_initial_tick);

        // The arena zeroed the offsets of preserved transactions that did not
        // fit the previous-epoch region. Close those holes so consumers can
        // keep indexing 0..count.
        for i in 0..preserved {
            let tick_index = max_ticks + i;
            let saved = counts[tick_index] as usize;
            let digest_base = tick_index * txs_per_tick;
            let mut dense = 0;
            for slot in 0..saved {
                let offset = arena.offset_at(tick_index, slot);
                if offset.is_absent() {
                    continue;
                }
                if dense != slot {
                    arena.set_offset(tick_index, dense, offset);
                    digests[digest_base + dense] = digests[digest_base + slot];
                }
                dense += 1;
            }
            for slot in dense..saved {
                arena.set_offset(tick_index, slot, TxOffset::ABSENT);
                digests[digest_base + slot] = Digest::ZERO;
            }
            if dense != saved {
                debug!(
                    tick_index,
                    dropped = saved - dense,
                    "compacted preserved tick after arena truncation"
                );
            }
            counts[tick_index] = dense as u32;
        }
    }
}
