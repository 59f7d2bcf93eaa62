//! # Tick Storage Subsystem
//!
//! Fixed-capacity, two-epoch in-memory database of consensus rounds:
//!
//! - one [`TickData`](shared_types::TickData) record per tick,
//! - one [`TickVote`](shared_types::TickVote) per tick and computor,
//! - a byte arena of variable-size transactions with a per-tick offset index,
//! - a digest lookup table resolving a transaction hash to its arena offset,
//! - binary snapshots of all of the above for fast node restarts.
//!
//! Every buffer is allocated once when [`TickStorage`] is constructed and
//! holds a current-epoch region followed by a smaller previous-epoch region.
//! [`TickStorage::begin_epoch`] relocates the tail of the finished epoch into
//! the previous-epoch region, so queries spanning the epoch boundary keep
//! working without a restart.
//!
//! ## Module Structure
//!
//! - [`arena`] - the transaction byte arena shared with the mempool crate
//! - [`storage`] - the [`TickStorage`] service owning all tick state,
//!   including the digest lookup table
//! - [`snapshot`] - snapshot file formats, save/load/invalidate
//! - [`ports`] / [`adapters`] - filesystem boundary for snapshot files

pub mod adapters;
pub mod arena;
mod digest_index;
pub mod errors;
pub mod ports;
pub mod snapshot;
pub mod storage;

pub use adapters::DirSnapshotIo;
pub use arena::TickTransactionArena;
pub use errors::{ArenaFullError, ConsistencyError, SnapshotError, StorageError};
pub use ports::SnapshotIo;
pub use storage::TickStorage;
