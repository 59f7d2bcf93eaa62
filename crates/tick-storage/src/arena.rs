//! Transaction byte arena.
//!
//! An append-only buffer holding variable-size encoded transactions back to
//! back, split into a current-epoch region and a smaller previous-epoch
//! region, plus the per-tick offset index that locates each transaction.
//!
//! Transactions never move within an epoch, so an offset handed out by
//! [`TickTransactionArena::append`] stays valid until the next epoch
//! transition. On a seamless transition the newest bytes of the finished
//! epoch are copied into the previous-epoch region and the preserved ticks'
//! offsets are shifted by a constant delta, which keeps every
//! `total_size()`-based walk working without re-parsing.

use shared_types::config::FIRST_TICK_TRANSACTION_OFFSET;
use shared_types::{StorageConfig, TxOffset, TxView};
use tracing::debug;

use crate::errors::{ArenaFullError, ConsistencyError, StorageError};

/// Fixed-capacity two-region transaction arena with its offset index.
///
/// The arena is a plain value; concurrent users wrap it in a lock. Both the
/// tick storage and the mempool own one instance each.
pub struct TickTransactionArena {
    config: StorageConfig,

    // Tick number range of current epoch storage.
    tick_begin: u32,
    tick_end: u32,

    // Tick number range of previous epoch storage.
    old_tick_begin: u32,
    old_tick_end: u32,

    // Current-epoch region followed by the previous-epoch region.
    buf: Box<[u8]>,

    // One offset word per (tick slot, transaction slot); 0 = absent.
    offsets: Box<[u64]>,

    // Where the next appended transaction will start.
    next_offset: u64,
}

impl TickTransactionArena {
    /// Allocates the arena and its offset index, both zeroed.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let buf = vec![0u8; config.arena_total_size() as usize].into_boxed_slice();
        let offsets = vec![0u64; config.offsets_len()].into_boxed_slice();
        Ok(Self {
            config,
            tick_begin: 0,
            tick_end: 0,
            old_tick_begin: 0,
            old_tick_end: 0,
            buf,
            offsets,
            next_offset: FIRST_TICK_TRANSACTION_OFFSET,
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

    /// Where the next appended transaction will start.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn set_next_offset(&mut self, offset: u64) {
        self.next_offset = offset;
    }

    /// Bytes still available for appends in the current-epoch region.
    pub fn remaining_capacity(&self) -> u64 {
        self.config.arena_current_size - self.next_offset
    }

    // =========================================================================
    // TICK WINDOWS
    // =========================================================================

    /// Whether the tick is stored in the current-epoch region.
    pub fn tick_in_current_epoch(&self, tick: u32) -> bool {
        tick >= self.tick_begin && tick < self.tick_end
    }

    /// Whether the tick is stored in the previous-epoch region.
    pub fn tick_in_previous_epoch(&self, tick: u32) -> bool {
        self.old_tick_begin <= tick && tick < self.old_tick_end
    }

    /// Slot index of a current-epoch tick. Does not check the window.
    pub fn tick_index_current(&self, tick: u32) -> usize {
        (tick - self.tick_begin) as usize
    }

    /// Slot index of a previous-epoch tick. Does not check the window.
    pub fn tick_index_previous(&self, tick: u32) -> usize {
        (tick - self.old_tick_begin) as usize + self.config.max_ticks_per_epoch as usize
    }

    /// Slot index for any stored tick, `None` outside both windows.
    pub fn tick_index(&self, tick: u32) -> Option<usize> {
        if self.tick_in_current_epoch(tick) {
            Some(self.tick_index_current(tick))
        } else if self.tick_in_previous_epoch(tick) {
            Some(self.tick_index_previous(tick))
        } else {
            None
        }
    }

    // =========================================================================
    // TRANSACTION BYTES
    // =========================================================================

    /// Appends an encoded transaction to the current-epoch region and returns
    /// its offset. On a full arena nothing is mutated, so the caller can skip
    /// the transaction and keep going.
    pub fn append(&mut self, encoded: &[u8]) -> Result<TxOffset, ArenaFullError> {
        let size = encoded.len() as u64;
        if self.next_offset + size > self.config.arena_current_size {
            return Err(ArenaFullError {
                needed: size,
                remaining: self.remaining_capacity(),
            });
        }
        let offset = self.next_offset;
        self.buf[offset as usize..(offset + size) as usize].copy_from_slice(encoded);
        self.next_offset += size;
        Ok(TxOffset(offset))
    }

    /// Reads the transaction starting at `offset`. Checks the offset against
    /// the total arena size and validates the declared transaction extent,
    /// but does not care which epoch region the offset falls in.
    pub fn tx_view(&self, offset: TxOffset) -> Option<TxView<'_>> {
        if offset.is_absent() || offset.get() >= self.buf.len() as u64 {
            return None;
        }
        TxView::parse(&self.buf[offset.get() as usize..])
    }

    // =========================================================================
    // OFFSET INDEX
    // =========================================================================

    /// Offset stored for `(tick slot, transaction slot)`.
    pub fn offset_at(&self, tick_index: usize, tx_slot: usize) -> TxOffset {
        debug_assert!(tx_slot < self.config.txs_per_tick as usize);
        TxOffset(self.offsets[tick_index * self.config.txs_per_tick as usize + tx_slot])
    }

    /// Stores an offset for `(tick slot, transaction slot)`.
    pub fn set_offset(&mut self, tick_index: usize, tx_slot: usize, offset: TxOffset) {
        debug_assert!(tx_slot < self.config.txs_per_tick as usize);
        self.offsets[tick_index * self.config.txs_per_tick as usize + tx_slot] = offset.get();
    }

    /// First unused transaction slot of a tick, `None` when the tick is full.
    pub fn find_free_slot(&self, tick_index: usize) -> Option<usize> {
        let base = tick_index * self.config.txs_per_tick as usize;
        self.offsets[base..base + self.config.txs_per_tick as usize]
            .iter()
            .position(|&offset| offset == 0)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn offset_words(&self) -> &[u64] {
        &self.offsets
    }

    pub(crate) fn offset_words_mut(&mut self) -> &mut [u64] {
        &mut self.offsets
    }

    // =========================================================================
    // EPOCH TRANSITION
    // =========================================================================

    /// Begins a new epoch whose first tick is `new_initial_tick`.
    ///
    /// If the previous epoch window contains the new initial tick (a seamless
    /// transition), the newest transaction bytes that fit are copied into the
    /// previous-epoch region and the offsets of the preserved trailing ticks
    /// are shifted to match; everything else is dropped. On a cold start both
    /// regions are simply zeroed.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        let current_size = self.config.arena_current_size;
        let prev_size = self.config.arena_prev_size;
        let txs_per_tick = self.config.txs_per_tick as usize;

        if self.tick_begin != 0
            && self.tick_in_current_epoch(new_initial_tick)
            && self.tick_begin < new_initial_tick
        {
            // Seamless transition: keep the trailing ticks of the finished epoch.
            self.old_tick_end = new_initial_tick;
            self.old_tick_begin = new_initial_tick
                .saturating_sub(self.config.ticks_kept_from_prior_epoch)
                .max(self.tick_begin);

            let stored = self.next_offset - FIRST_TICK_TRANSACTION_OFFSET;
            let keep = stored.min(prev_size);
            let first_keep = self.next_offset - keep;
            self.buf.copy_within(
                first_keep as usize..self.next_offset as usize,
                current_size as usize,
            );

            // Offsets shift by a constant because the preserved bytes stay
            // contiguous: they now end at current_size + keep instead of at
            // next_offset.
            let delta = current_size + keep - self.next_offset;
            for tick in self.old_tick_begin..self.old_tick_end {
                let cur_base = self.tick_index_current(tick) * txs_per_tick;
                let prev_base = self.tick_index_previous(tick) * txs_per_tick;
                for tx_slot in 0..txs_per_tick {
                    let offset = self.offsets[cur_base + tx_slot];
                    self.offsets[prev_base + tx_slot] = if offset == 0 || offset < first_keep {
                        // Not stored at all, or truncated away by the smaller
                        // previous-epoch region.
                        0
                    } else {
                        offset + delta
                    };
                }
            }

            self.offsets[..self.config.offsets_len_current_epoch()].fill(0);
            self.buf[..current_size as usize].fill(0);

            debug!(
                old_tick_begin = self.old_tick_begin,
                old_tick_end = self.old_tick_end,
                kept_bytes = keep,
                "arena seamless epoch transition"
            );
        } else {
            // Cold start: no prior epoch data to keep.
            self.buf.fill(0);
            self.offsets.fill(0);
            self.old_tick_begin = 0;
            self.old_tick_end = 0;
        }

        self.tick_begin = new_initial_tick;
        self.tick_end = new_initial_tick + self.config.max_ticks_per_epoch;
        self.next_offset = FIRST_TICK_TRANSACTION_OFFSET;
    }

    // =========================================================================
    // CONSISTENCY
    // =========================================================================

    /// Full walk of both epoch windows validating every stored transaction
    /// against its offset-index entry. Expensive; meant for tests and
    /// debugging.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
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
        window(
            self.next_offset >= FIRST_TICK_TRANSACTION_OFFSET
                && self.next_offset <= self.config.arena_current_size,
            "append cursor inside the current region",
        )?;

        // Previous-epoch window.
        for tick in self.old_tick_begin..self.old_tick_end {
            let tick_index = self.tick_index_previous(tick);
            for tx_slot in 0..self.config.txs_per_tick as usize {
                let offset = self.offset_at(tick_index, tx_slot);
                if offset.is_absent() {
                    continue;
                }
                self.check_stored_transaction(tick, tx_slot, offset)?;
            }
        }

        // Current-epoch window; the largest end offset must equal the cursor.
        let mut last_end = FIRST_TICK_TRANSACTION_OFFSET;
        for tick in self.tick_begin..self.tick_end {
            let tick_index = self.tick_index_current(tick);
            for tx_slot in 0..self.config.txs_per_tick as usize {
                let offset = self.offset_at(tick_index, tx_slot);
                if offset.is_absent() {
                    continue;
                }
                let view = self.check_stored_transaction(tick, tx_slot, offset)?;
                last_end = last_end.max(offset.get() + view.total_size() as u64);
            }
        }
        if last_end != self.next_offset {
            return Err(ConsistencyError::Cursor {
                cursor: self.next_offset,
                last_end,
            });
        }
        Ok(())
    }

    fn check_stored_transaction(
        &self,
        tick: u32,
        tx_slot: usize,
        offset: TxOffset,
    ) -> Result<TxView<'_>, ConsistencyError> {
        let fail = |reason: &str| ConsistencyError::Transaction {
            tick,
            slot: tx_slot as u32,
            offset: offset.get(),
            reason: reason.to_string(),
        };
        let view = self.tx_view(offset).ok_or_else(|| fail("unreadable"))?;
        if !view.check_validity() {
            return Err(fail("validity check failed"));
        }
        if view.tick() != tick {
            return Err(fail("tick field does not match owning tick"));
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Transaction;

    fn test_config() -> StorageConfig {
        StorageConfig::with_counts(200, 10, 4, 8)
    }

    fn tx(tick: u32, payload: Vec<u8>) -> Transaction {
        Transaction {
            source_public_key: [1; 32],
            destination_public_key: [2; 32],
            amount: 5,
            tick,
            input_type: 0,
            input: payload,
            signature: [9; 64],
        }
    }

    fn store(arena: &mut TickTransactionArena, transaction: &Transaction) -> TxOffset {
        let tick_index = arena.tick_index_current(transaction.tick);
        let slot = arena.find_free_slot(tick_index).unwrap();
        let offset = arena.append(&transaction.encode()).unwrap();
        arena.set_offset(tick_index, slot, offset);
        offset
    }

    #[test]
    fn append_places_transactions_back_to_back() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);

        let first = tx(1000, vec![1, 2, 3]);
        let second = tx(1000, vec![4]);
        let a = store(&mut arena, &first);
        let b = store(&mut arena, &second);

        assert_eq!(a.get(), FIRST_TICK_TRANSACTION_OFFSET);
        assert_eq!(b.get(), a.get() + first.total_size() as u64);
        assert_eq!(
            arena.next_offset(),
            b.get() + second.total_size() as u64
        );
        assert_eq!(arena.tx_view(a).unwrap().to_owned(), first);
        arena.check_consistency().unwrap();
    }

    #[test]
    fn append_at_exact_capacity_succeeds_and_one_more_fails_cleanly() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);

        let remaining = arena.remaining_capacity() as usize;
        let exact = vec![0xAA; remaining];
        arena.append(&exact).unwrap();
        assert_eq!(arena.remaining_capacity(), 0);

        let cursor = arena.next_offset();
        let err = arena.append(&[0xBB]).unwrap_err();
        assert_eq!(err.remaining, 0);
        assert_eq!(arena.next_offset(), cursor);
    }

    #[test]
    fn window_checks_are_half_open() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);
        assert!(arena.tick_in_current_epoch(1000));
        assert!(arena.tick_in_current_epoch(1199));
        assert!(!arena.tick_in_current_epoch(1200));
        assert!(!arena.tick_in_current_epoch(999));
    }

    #[test]
    fn cold_start_clears_previous_window() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);
        store(&mut arena, &tx(1005, vec![1]));
        // Restart far outside the stored window.
        arena.begin_epoch(5000);
        assert_eq!(arena.old_tick_begin(), 0);
        assert_eq!(arena.old_tick_end(), 0);
        assert_eq!(arena.next_offset(), FIRST_TICK_TRANSACTION_OFFSET);
        arena.check_consistency().unwrap();
    }

    #[test]
    fn seamless_transition_preserves_trailing_ticks() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);

        let early = tx(1005, vec![1, 2, 3]);
        let late = tx(1095, vec![7, 7, 7, 7]);
        store(&mut arena, &early);
        store(&mut arena, &late);

        arena.begin_epoch(1100);
        assert_eq!(arena.old_tick_begin(), 1090);
        assert_eq!(arena.old_tick_end(), 1100);

        // Tick 1005 is outside the preserved window.
        assert!(arena.tick_index(1005).is_none());

        // Tick 1095 survived; its offset now points into the previous region.
        let tick_index = arena.tick_index(1095).unwrap();
        let offset = arena.offset_at(tick_index, 0);
        assert!(offset.get() >= arena.config().arena_current_size);
        assert_eq!(arena.tx_view(offset).unwrap().to_owned(), late);
        arena.check_consistency().unwrap();
    }

    #[test]
    fn transition_drops_preserved_offsets_that_no_longer_fit() {
        // Previous region fits a single transaction only.
        let tx_size = tx(1095, vec![0; 4]).total_size() as u64;
        let config = StorageConfig {
            arena_prev_size: tx_size,
            ..test_config()
        };
        let mut arena = TickTransactionArena::new(config).unwrap();
        arena.begin_epoch(1000);

        let older = tx(1094, vec![0; 4]);
        let newer = tx(1095, vec![0; 4]);
        store(&mut arena, &older);
        store(&mut arena, &newer);

        arena.begin_epoch(1100);

        // Only the newest transaction fit into the previous-epoch region.
        let dropped_index = arena.tick_index(1094).unwrap();
        assert!(arena.offset_at(dropped_index, 0).is_absent());
        let kept_index = arena.tick_index(1095).unwrap();
        let offset = arena.offset_at(kept_index, 0);
        assert_eq!(arena.tx_view(offset).unwrap().to_owned(), newer);
        arena.check_consistency().unwrap();
    }

    #[test]
    fn repeating_a_transition_resets_the_preserved_window() {
        let mut arena = TickTransactionArena::new(test_config()).unwrap();
        arena.begin_epoch(1000);
        store(&mut arena, &tx(1095, vec![5; 8]));

        arena.begin_epoch(1100);
        let window = (arena.old_tick_begin(), arena.old_tick_end());
        let next = arena.next_offset();

        // A second transition from the same quiescent state: the new initial
        // tick equals tick_begin, so this is treated as a cold start.
        arena.begin_epoch(1100);
        assert_eq!(arena.next_offset(), next);
        assert_eq!((arena.old_tick_begin(), arena.old_tick_end()), (0, 0));
        assert_ne!(window, (0, 0));
        arena.check_consistency().unwrap();
    }
}
