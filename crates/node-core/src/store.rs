//! The node storage value.

use std::sync::Arc;

use contract_runtime::{BalanceTransfer, ContractDef, ContractExecutor};
use shared_types::StorageConfig;
use tick_storage::{ConsistencyError, TickStorage};
use tracing::info;
use txs_pool::TxsPool;

use crate::errors::NodeError;

/// The execution and ledger-storage core of one node.
pub struct NodeStore {
    config: StorageConfig,
    tick_storage: TickStorage,
    txs_pool: TxsPool,
    executor: ContractExecutor,
}

impl NodeStore {
    /// Allocates every core buffer and builds the contract registry.
    pub fn new(
        config: StorageConfig,
        contracts: Vec<ContractDef>,
        balances: Arc<dyn BalanceTransfer>,
    ) -> Result<Self, NodeError> {
        let tick_storage = TickStorage::new(config.clone())?;
        let txs_pool = TxsPool::new(config.clone())?;
        let executor = ContractExecutor::new(contracts, &config, balances)?;
        info!(
            contracts = executor.contract_count(),
            max_ticks_per_epoch = config.max_ticks_per_epoch,
            "node core allocated"
        );
        Ok(Self {
            config,
            tick_storage,
            txs_pool,
            executor,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Begins a new epoch in every tick-windowed subsystem.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        info!(new_initial_tick, "node core epoch transition");
        self.tick_storage.begin_epoch(new_initial_tick);
        self.txs_pool.begin_epoch(new_initial_tick);
    }

    /// Copies a finalized tick's staged transactions out of the pool into
    /// the tick storage, where they become digest-addressable. Returns how
    /// many were stored; transactions the storage rejects (arena full, slot
    /// budget) are skipped.
    pub fn promote_tick_transactions(&self, tick: u32) -> usize {
        let staged = self.txs_pool.get_number_of_tick_txs(tick) as usize;
        let mut stored = 0;
        for index in 0..staged {
            let Some(tx) = self.txs_pool.get(tick, index) else {
                break;
            };
            if self.tick_storage.store_transaction(&tx).is_ok() {
                stored += 1;
            }
        }
        stored
    }

    pub fn tick_storage(&self) -> &TickStorage {
        &self.tick_storage
    }

    pub fn tick_storage_mut(&mut self) -> &mut TickStorage {
        &mut self.tick_storage
    }

    pub fn txs_pool(&self) -> &TxsPool {
        &self.txs_pool
    }

    pub fn executor(&self) -> &ContractExecutor {
        &self.executor
    }

    /// Full consistency walk over the tick storage.
    pub fn check_state_consistency(&self) -> Result<(), ConsistencyError> {
        self.tick_storage.check_state_consistency()
    }
}
