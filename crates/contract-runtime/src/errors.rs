//! Contract runtime error types.

use thiserror::Error;

use crate::executor::ContractIndex;

/// Errors surfaced by contract execution.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// A contract index beyond the registry.
    #[error("contract index {index} out of range ({count} contracts registered)")]
    InvalidContractIndex { index: ContractIndex, count: usize },

    /// No user procedure registered under the input type.
    #[error("contract {contract} has no user procedure for input type {input_type}")]
    UnknownProcedure { contract: ContractIndex, input_type: u16 },

    /// No user function registered under the input type.
    #[error("contract {contract} has no user function for input type {input_type}")]
    UnknownFunction { contract: ContractIndex, input_type: u16 },

    /// The locals stack has no room for the call frame. The call is aborted;
    /// the caller may retry later.
    #[error("locals stack exhausted: frame needs {needed} bytes, {available} available")]
    StackFull { needed: usize, available: usize },

    /// `stacks_to_ignore` left no stack to scan.
    #[error("no locals stack available: {ignored} of {count} reserved")]
    NoStackAvailable { ignored: usize, count: usize },

    /// Writer-priority stack reservation needs at least two stacks.
    #[error("{count} locals stacks configured, need at least 2")]
    TooFewLocalsStacks { count: usize },

    /// A read-only function tried to run a state-mutating procedure.
    #[error("read-only context cannot invoke a state-mutating procedure")]
    MutatingCallFromFunction,

    /// Cross-contract calls must target a lower contract index; anything else
    /// would break the state-lock ordering.
    #[error("contract {contract} may only invoke lower-indexed contracts, not {target}")]
    InvalidSubcallTarget { contract: ContractIndex, target: ContractIndex },
}
