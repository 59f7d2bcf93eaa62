//! Node core error types.

use contract_runtime::ExecutorError;
use thiserror::Error;
use tick_storage::StorageError;

/// Construction/wiring failures of the node core.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// A storage subsystem rejected the configuration.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The contract runtime rejected the registry or its configuration.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
