//! # Pending Transaction Pool
//!
//! Staging area for transactions that target a future tick of the running
//! epoch. Incoming transactions are validated, hashed, and appended into a
//! private transaction arena; consumers drain them per tick when the tick is
//! finalized.
//!
//! ## Shape
//!
//! The pool shares the two-epoch arena layout of the tick storage: per-tick
//! offset rows, a digest per stored transaction, and a saved-transaction
//! count per tick. Counts are the source of truth for consumers: slots
//! `0..count` of a tick are always dense and non-empty, which the epoch
//! transition re-establishes by compacting away transactions that did not
//! survive the arena truncation.

pub mod errors;
pub mod pool;

pub use errors::PoolError;
pub use pool::TxsPool;
