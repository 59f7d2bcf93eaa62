//! # Contract Runtime Subsystem
//!
//! Executes the fixed registry of deterministic smart contracts:
//!
//! - **System procedures** run on lifecycle events (epoch begin, tick begin,
//!   ...) and mutate contract state under a writer lock.
//! - **User procedures** are invoked by transactions, mutate state, and get a
//!   scratch frame (input | output | locals) carved out of a pre-allocated
//!   locals stack.
//! - **User functions** are read-only queries taking a reader lock, so any
//!   number can run against a contract while no procedure writes it.
//!
//! Contracts may call into other contracts mid-execution. A sub-call carves
//! its frames out of the remaining space of the same locals stack and may
//! only target a lower contract index, which totally orders state-lock
//! acquisition and rules out deadlock.
//!
//! Every writer-lock release flips the contract's bit in an atomic change
//! bitmap; checkpointing reads and clears it without taking any lock.

pub mod adapters;
pub mod context;
pub mod errors;
pub mod executor;
pub mod locals_pool;
pub mod ports;

pub use context::QpiContext;
pub use errors::ExecutorError;
pub use executor::{
    contract_id, ContractDef, ContractExecutor, ContractIndex, SystemProcedure, SystemProcedureId,
    UserFunction, UserFunctionDef, UserProcedure, UserProcedureDef,
};
pub use locals_pool::ContractLocalsPool;
pub use ports::BalanceTransfer;
