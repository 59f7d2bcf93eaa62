//! Tick storage snapshots.
//!
//! Saving the whole tick storage to disk lets a restarted node skip most of
//! the network sync: everything in this subsystem can be reloaded from five
//! binary files instead of being fetched peer by peer.
//!
//! ## File Set (per epoch `E`, three-digit suffix)
//!
//! | file | contents |
//! |---|---|
//! | `snapshotMetadata.EEE` | [`SnapshotMetadata`], 28 bytes little-endian |
//! | `snapshotTickdata.EEE` | `n_tick` encoded tick data records |
//! | `snapshotTicks.EEE` | `n_tick × num_computors` encoded votes, tick-major |
//! | `snapshotTickTransactionOffsets.EEE` | `n_tick × txs_per_tick` offset words |
//! | `snapshotTickTransaction.EEE` | arena prefix up to the last stored byte |
//!
//! Metadata is written last, so a crash mid-save leaves the previous
//! snapshot's metadata pointing at files it still describes, or at nothing.

use shared_types::config::FIRST_TICK_TRANSACTION_OFFSET;
use shared_types::{TickData, TickVote};
use tracing::{info, warn};

use crate::errors::SnapshotError;
use crate::ports::SnapshotIo;
use crate::storage::TickStorage;

/// Fixed-size descriptor of one saved snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Epoch the snapshot belongs to.
    pub epoch: u32,
    /// First tick covered (the epoch's initial tick).
    pub tick_begin: u32,
    /// Last tick covered, inclusive.
    pub tick_end: u32,
    /// Bytes written to the transactions file.
    pub total_transaction_size: i64,
    /// Arena append cursor to restore on load.
    pub next_tick_transaction_offset: u64,
}

impl SnapshotMetadata {
    pub const ENCODED_SIZE: usize = 4 + 4 + 4 + 8 + 8;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[0..4].copy_from_slice(&self.epoch.to_le_bytes());
        out[4..8].copy_from_slice(&self.tick_begin.to_le_bytes());
        out[8..12].copy_from_slice(&self.tick_end.to_le_bytes());
        out[12..20].copy_from_slice(&self.total_transaction_size.to_le_bytes());
        out[20..28].copy_from_slice(&self.next_tick_transaction_offset.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_SIZE {
            return None;
        }
        Some(Self {
            epoch: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            tick_begin: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            tick_end: u32::from_le_bytes(bytes[8..12].try_into().ok()?),
            total_transaction_size: i64::from_le_bytes(bytes[12..20].try_into().ok()?),
            next_tick_transaction_offset: u64::from_le_bytes(bytes[20..28].try_into().ok()?),
        })
    }
}

/// Snapshot bookkeeping carried by the storage between saves.
#[derive(Default)]
pub(crate) struct SnapshotState {
    pub(crate) metadata: SnapshotMetadata,
    /// Lowest tick the transaction-prefix scan still has to visit. Raised to
    /// the tick holding the farthest stored byte on every save, so repeated
    /// saves do not rescan the whole epoch.
    pub(crate) last_checked_tick: u32,
}

struct SnapshotFiles {
    metadata: String,
    tick_data: String,
    ticks: String,
    offsets: String,
    transactions: String,
}

impl SnapshotFiles {
    fn for_epoch(epoch: u32) -> Self {
        Self {
            metadata: format!("snapshotMetadata.{epoch:03}"),
            tick_data: format!("snapshotTickdata.{epoch:03}"),
            ticks: format!("snapshotTicks.{epoch:03}"),
            offsets: format!("snapshotTickTransactionOffsets.{epoch:03}"),
            transactions: format!("snapshotTickTransaction.{epoch:03}"),
        }
    }
}

fn save_section(
    io: &dyn SnapshotIo,
    name: &str,
    bytes: &[u8],
    err: fn(String) -> SnapshotError,
) -> Result<(), SnapshotError> {
    let written = io.save_file(name, bytes).map_err(|e| err(e.to_string()))?;
    if written != bytes.len() as u64 {
        return Err(err(format!(
            "short write: {} of {} bytes",
            written,
            bytes.len()
        )));
    }
    Ok(())
}

fn load_section(
    io: &dyn SnapshotIo,
    name: &str,
    expected: usize,
    err: fn(String) -> SnapshotError,
) -> Result<Vec<u8>, SnapshotError> {
    let bytes = io
        .load_file(name, expected as u64)
        .map_err(|e| err(e.to_string()))?;
    if bytes.len() != expected {
        return Err(err(format!(
            "short read: {} of {} bytes",
            bytes.len(),
            expected
        )));
    }
    Ok(bytes)
}

impl TickStorage {
    /// Saves everything stored for ticks `[tick_begin, tick]` of the running
    /// epoch. Sections are written under their own locks, metadata last.
    pub fn try_save_to_file(
        &self,
        epoch: u32,
        tick: u32,
        io: &dyn SnapshotIo,
    ) -> Result<(), SnapshotError> {
        if tick <= self.tick_begin || !self.tick_in_current_epoch(tick) {
            return Err(SnapshotError::TickNotAboveEpochStart {
                tick,
                tick_begin: self.tick_begin,
            });
        }
        let n_tick = (tick - self.tick_begin + 1) as usize;
        let txs_per_tick = self.config.txs_per_tick as usize;
        let files = SnapshotFiles::for_epoch(epoch);

        info!(epoch, tick, n_tick, "saving tick data");
        let record_size = TickData::encoded_size(self.config.txs_per_tick);
        let bytes = {
            let guard = self.tick_data.lock();
            let mut out = vec![0u8; n_tick * record_size];
            for (slot, chunk) in out.chunks_exact_mut(record_size).enumerate() {
                guard[slot].encode_into(self.config.txs_per_tick, chunk);
            }
            out
        };
        save_section(io, &files.tick_data, &bytes, SnapshotError::TickData)?;

        info!("saving computor votes");
        let bytes = {
            let columns: Vec<_> = self.vote_columns.iter().map(|c| c.lock()).collect();
            let mut out = vec![0u8; n_tick * columns.len() * TickVote::ENCODED_SIZE];
            let mut cursor = 0;
            for slot in 0..n_tick {
                for column in &columns {
                    column[slot].encode_into(&mut out[cursor..cursor + TickVote::ENCODED_SIZE]);
                    cursor += TickVote::ENCODED_SIZE;
                }
            }
            out
        };
        save_section(io, &files.ticks, &bytes, SnapshotError::Ticks)?;

        let arena = self.arena.lock();
        let mut snapshot = self.snapshot_state.lock();

        info!("saving transaction offsets");
        let mut bytes = Vec::with_capacity(n_tick * txs_per_tick * 8);
        for word in &arena.offset_words()[..n_tick * txs_per_tick] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        save_section(io, &files.offsets, &bytes, SnapshotError::TransactionOffsets)?;

        info!("saving transactions");
        // The append cursor counts mempool-style appends too, so the real end
        // of the stored data is recomputed: scan down from the saved tick to
        // the watermark, keeping the largest transaction end offset.
        let mut max_end = FIRST_TICK_TRANSACTION_OFFSET;
        snapshot.last_checked_tick = snapshot.last_checked_tick.max(self.tick_begin);
        for t in (snapshot.last_checked_tick..=tick).rev() {
            let tick_index = arena.tick_index_current(t);
            for tx_slot in (0..txs_per_tick).rev() {
                let offset = arena.offset_at(tick_index, tx_slot);
                if offset.is_absent() {
                    continue;
                }
                if let Some(view) = arena.tx_view(offset) {
                    let end = offset.get() + view.total_size() as u64;
                    if end > max_end {
                        max_end = end;
                        snapshot.last_checked_tick = t;
                    }
                }
            }
        }
        save_section(
            io,
            &files.transactions,
            &arena.bytes()[..max_end as usize],
            SnapshotError::Transactions,
        )?;
        drop(arena);

        info!("saving metadata");
        snapshot.metadata = SnapshotMetadata {
            epoch,
            tick_begin: self.tick_begin,
            tick_end: tick,
            total_transaction_size: max_end as i64,
            next_tick_transaction_offset: max_end,
        };
        save_section(
            io,
            &files.metadata,
            &snapshot.metadata.encode(),
            SnapshotError::Metadata,
        )?;
        Ok(())
    }

    /// Loads a snapshot saved by [`Self::try_save_to_file`].
    ///
    /// Must run once at startup, after `begin_epoch` was called with the
    /// epoch's first tick: the saved `tick_begin` has to match the live
    /// window start, otherwise the snapshot is rejected as inconsistent. On
    /// any failure the in-memory metadata is reset to the empty sentinel and
    /// a step-coded error is returned; the storage content is unspecified
    /// until the next `begin_epoch`.
    pub fn try_load_from_file(
        &mut self,
        epoch: u32,
        io: &dyn SnapshotIo,
    ) -> Result<(), SnapshotError> {
        let files = SnapshotFiles::for_epoch(epoch);
        let txs_per_tick = self.config.txs_per_tick as usize;

        info!(epoch, "loading snapshot metadata");
        let meta = match io
            .load_file(&files.metadata, SnapshotMetadata::ENCODED_SIZE as u64)
            .ok()
            .and_then(|bytes| SnapshotMetadata::decode(&bytes))
        {
            Some(meta) => meta,
            None => {
                warn!("cannot load snapshot metadata, continuing without snapshot");
                self.init_snapshot_metadata(epoch);
                return Err(SnapshotError::Metadata("metadata missing or wrong size".into()));
            }
        };
        if let Err(reason) = self.check_metadata(&meta, epoch) {
            warn!(reason = %reason, "snapshot metadata rejected");
            self.init_snapshot_metadata(epoch);
            return Err(SnapshotError::InconsistentMetadata(reason));
        }

        let n_tick = (meta.tick_end - meta.tick_begin + 1) as usize;

        info!(n_tick, "loading tick data");
        let record_size = TickData::encoded_size(self.config.txs_per_tick);
        let records = load_section(io, &files.tick_data, n_tick * record_size, SnapshotError::TickData)
            .and_then(|bytes| {
                bytes
                    .chunks_exact(record_size)
                    .map(|chunk| {
                        TickData::decode(self.config.txs_per_tick, chunk)
                            .ok_or_else(|| SnapshotError::TickData("undecodable record".into()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            });
        match records {
            Ok(records) => {
                let tick_data = self.tick_data.get_mut();
                for (slot, data) in records.into_iter().enumerate() {
                    tick_data[slot] = data;
                }
            }
            Err(err) => {
                self.init_snapshot_metadata(epoch);
                return Err(err);
            }
        }

        info!("loading computor votes");
        let computors = self.vote_columns.len();
        let expected = n_tick * computors * TickVote::ENCODED_SIZE;
        let votes = load_section(io, &files.ticks, expected, SnapshotError::Ticks).and_then(
            |bytes| {
                bytes
                    .chunks_exact(TickVote::ENCODED_SIZE)
                    .map(|chunk| {
                        TickVote::decode(chunk)
                            .ok_or_else(|| SnapshotError::Ticks("undecodable vote".into()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            },
        );
        match votes {
            Ok(votes) => {
                // The file is tick-major; distribute each row across the
                // per-computor columns.
                for (i, vote) in votes.into_iter().enumerate() {
                    let slot = i / computors;
                    let computor = i % computors;
                    self.vote_columns[computor].get_mut()[slot] = vote;
                }
            }
            Err(err) => {
                self.init_snapshot_metadata(epoch);
                return Err(err);
            }
        }

        info!("loading transaction offsets");
        let expected = n_tick * txs_per_tick * 8;
        match load_section(io, &files.offsets, expected, SnapshotError::TransactionOffsets) {
            Ok(bytes) => {
                let words = self.arena.get_mut().offset_words_mut();
                for (word, chunk) in words[..n_tick * txs_per_tick]
                    .iter_mut()
                    .zip(bytes.chunks_exact(8))
                {
                    *word = u64::from_le_bytes(chunk.try_into().unwrap_or_default());
                }
            }
            Err(err) => {
                self.init_snapshot_metadata(epoch);
                return Err(err);
            }
        }

        info!(
            bytes = meta.total_transaction_size,
            "loading transactions"
        );
        let expected = meta.total_transaction_size as usize;
        match load_section(io, &files.transactions, expected, SnapshotError::Transactions) {
            Ok(bytes) => {
                let arena = self.arena.get_mut();
                arena.bytes_mut()[..expected].copy_from_slice(&bytes);
                arena.set_next_offset(meta.next_tick_transaction_offset);
            }
            Err(err) => {
                self.init_snapshot_metadata(epoch);
                return Err(err);
            }
        }

        let mut snapshot = self.snapshot_state.lock();
        snapshot.metadata = meta;
        snapshot.last_checked_tick = meta.tick_begin;
        Ok(())
    }

    fn check_metadata(&self, meta: &SnapshotMetadata, epoch: u32) -> Result<(), String> {
        if meta.tick_begin > meta.tick_end {
            return Err(format!(
                "tick_begin {} above tick_end {}",
                meta.tick_begin, meta.tick_end
            ));
        }
        if meta.tick_begin != self.tick_begin {
            return Err(format!(
                "saved tick_begin {} does not match live window start {}",
                meta.tick_begin, self.tick_begin
            ));
        }
        if meta.tick_end > meta.tick_begin + self.config.max_ticks_per_epoch {
            return Err(format!(
                "saved window of {} ticks exceeds the epoch capacity",
                meta.tick_end - meta.tick_begin
            ));
        }
        if meta.epoch != epoch {
            return Err(format!("saved epoch {} is not {}", meta.epoch, epoch));
        }
        if meta.total_transaction_size < FIRST_TICK_TRANSACTION_OFFSET as i64
            || meta.total_transaction_size as u64 > self.config.arena_current_size
        {
            return Err(format!(
                "saved transaction size {} does not fit the arena",
                meta.total_transaction_size
            ));
        }
        Ok(())
    }

    /// Writes an all-zero metadata blob, marking the epoch's snapshot files
    /// as unusable without deleting them.
    pub fn save_invalidation(&self, epoch: u32, io: &dyn SnapshotIo) -> Result<(), SnapshotError> {
        let files = SnapshotFiles::for_epoch(epoch);
        save_section(
            io,
            &files.metadata,
            &[0u8; SnapshotMetadata::ENCODED_SIZE],
            SnapshotError::Metadata,
        )
    }

    /// The last tick covered by the most recently saved or loaded snapshot;
    /// a restarted node resumes fetching from here.
    pub fn preload_tick(&self) -> u32 {
        self.snapshot_state.lock().metadata.tick_end
    }

    /// The in-memory metadata of the most recent snapshot.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        self.snapshot_state.lock().metadata
    }

    fn init_snapshot_metadata(&self, epoch: u32) {
        let mut snapshot = self.snapshot_state.lock();
        snapshot.metadata = SnapshotMetadata {
            epoch,
            tick_begin: self.tick_begin,
            tick_end: self.tick_begin,
            total_transaction_size: 0,
            next_tick_transaction_offset: FIRST_TICK_TRANSACTION_OFFSET,
        };
        snapshot.last_checked_tick = self.tick_begin;
    }
}
