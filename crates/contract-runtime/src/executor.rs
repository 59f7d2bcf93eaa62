//! The contract executor.
//!
//! Holds the fixed contract registry: one opaque state blob per contract
//! behind a reader-writer lock, plus the handler tables for system
//! procedures, user procedures and user functions. Handlers are plain
//! function pointers registered at construction; there is no dynamic
//! loading.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use shared_types::{PublicKey, StorageConfig};
use tracing::debug;

use crate::context::{CallKind, QpiContext};
use crate::errors::ExecutorError;
use crate::locals_pool::ContractLocalsPool;
use crate::ports::BalanceTransfer;

/// Index into the contract registry.
pub type ContractIndex = u32;

/// Lifecycle events dispatched to every contract that registered a handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SystemProcedureId {
    Initialize,
    BeginEpoch,
    EndEpoch,
    BeginTick,
    EndTick,
}

/// Handler for a lifecycle event: `(context, state)`.
pub type SystemProcedure = for<'e> fn(&QpiContext<'e>, &mut [u8]);

/// Handler for a state-mutating invocation:
/// `(context, state, input, output, locals)`.
pub type UserProcedure = for<'e> fn(&QpiContext<'e>, &mut [u8], &[u8], &mut [u8], &mut [u8]);

/// Handler for a read-only query:
/// `(context, state, input, output, locals)`.
pub type UserFunction = for<'e> fn(&QpiContext<'e>, &[u8], &[u8], &mut [u8], &mut [u8]);

/// A registered user procedure with its frame sizes.
#[derive(Clone, Copy)]
pub struct UserProcedureDef {
    pub handler: UserProcedure,
    pub input_size: u16,
    pub output_size: u16,
    pub locals_size: u32,
}

/// A registered user function with its frame sizes.
#[derive(Clone, Copy)]
pub struct UserFunctionDef {
    pub handler: UserFunction,
    pub input_size: u16,
    pub output_size: u16,
    pub locals_size: u32,
}

impl UserProcedureDef {
    pub(crate) fn frame_size(&self) -> usize {
        self.input_size as usize + self.output_size as usize + self.locals_size as usize
    }
}

impl UserFunctionDef {
    pub(crate) fn frame_size(&self) -> usize {
        self.input_size as usize + self.output_size as usize + self.locals_size as usize
    }
}

/// Registration-time description of one contract.
#[derive(Default)]
pub struct ContractDef {
    pub state_size: usize,
    pub system_procedures: HashMap<SystemProcedureId, SystemProcedure>,
    pub user_procedures: HashMap<u16, UserProcedureDef>,
    pub user_functions: HashMap<u16, UserFunctionDef>,
}

impl ContractDef {
    pub fn new(state_size: usize) -> Self {
        Self {
            state_size,
            ..Self::default()
        }
    }

    pub fn with_system_procedure(mut self, id: SystemProcedureId, handler: SystemProcedure) -> Self {
        self.system_procedures.insert(id, handler);
        self
    }

    pub fn with_user_procedure(
        mut self,
        input_type: u16,
        handler: UserProcedure,
        input_size: u16,
        output_size: u16,
        locals_size: u32,
    ) -> Self {
        self.user_procedures.insert(
            input_type,
            UserProcedureDef {
                handler,
                input_size,
                output_size,
                locals_size,
            },
        );
        self
    }

    pub fn with_user_function(
        mut self,
        input_type: u16,
        handler: UserFunction,
        input_size: u16,
        output_size: u16,
        locals_size: u32,
    ) -> Self {
        self.user_functions.insert(
            input_type,
            UserFunctionDef {
                handler,
                input_size,
                output_size,
                locals_size,
            },
        );
        self
    }
}

pub(crate) struct ContractEntry {
    pub(crate) system_procedures: HashMap<SystemProcedureId, SystemProcedure>,
    pub(crate) user_procedures: HashMap<u16, UserProcedureDef>,
    pub(crate) user_functions: HashMap<u16, UserFunctionDef>,
}

/// The 256-bit identity of a registered contract.
pub fn contract_id(index: ContractIndex) -> PublicKey {
    let mut id = [0u8; 32];
    id[0..8].copy_from_slice(&u64::from(index).to_le_bytes());
    id
}

/// Executor over the fixed contract registry.
pub struct ContractExecutor {
    contracts: Box<[ContractEntry]>,

    // One opaque state blob per contract. Writers are procedures; readers
    // are functions and checkpointing.
    states: Box<[RwLock<Box<[u8]>>]>,

    locals_pool: ContractLocalsPool,

    // Cumulative execution time per contract, in monotonic counter ticks.
    execution_ticks: Box<[AtomicU64]>,

    // Bit per contract, set after every writer-lock release. Word c/64,
    // bit c%64.
    state_change_flags: Box<[AtomicU64]>,

    balances: Arc<dyn BalanceTransfer>,
}

impl ContractExecutor {
    /// Builds the executor from the registry, allocating every contract's
    /// state blob (zeroed) and the locals stacks.
    pub fn new(
        contracts: Vec<ContractDef>,
        config: &StorageConfig,
        balances: Arc<dyn BalanceTransfer>,
    ) -> Result<Self, ExecutorError> {
        let locals_pool =
            ContractLocalsPool::new(config.locals_stack_count, config.locals_stack_size)?;
        let states = contracts
            .iter()
            .map(|def| RwLock::new(vec![0u8; def.state_size].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let execution_ticks = (0..contracts.len())
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let flag_words = contracts.len().div_ceil(64).max(1);
        let state_change_flags = (0..flag_words)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let contracts = contracts
            .into_iter()
            .map(|def| ContractEntry {
                system_procedures: def.system_procedures,
                user_procedures: def.user_procedures,
                user_functions: def.user_functions,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            contracts,
            states,
            locals_pool,
            execution_ticks,
            state_change_flags,
            balances,
        })
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    // TODO: escalate an out-of-range index to a processor restart once the
    // node loop exposes that path; today release builds just refuse the call.
    pub(crate) fn entry(&self, contract: ContractIndex) -> Result<&ContractEntry, ExecutorError> {
        self.contracts
            .get(contract as usize)
            .ok_or(ExecutorError::InvalidContractIndex {
                index: contract,
                count: self.contracts.len(),
            })
    }

    pub(crate) fn state_lock(&self, contract: ContractIndex) -> &RwLock<Box<[u8]>> {
        &self.states[contract as usize]
    }

    pub(crate) fn balances(&self) -> &dyn BalanceTransfer {
        self.balances.as_ref()
    }

    pub(crate) fn record_execution(&self, contract: ContractIndex, started: Instant) {
        self.execution_ticks[contract as usize]
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn mark_state_changed(&self, contract: ContractIndex) {
        self.state_change_flags[contract as usize / 64]
            .fetch_or(1u64 << (contract % 64), Ordering::Relaxed);
    }

    // =========================================================================
    // CALL PATHS
    // =========================================================================

    /// Runs a contract's handler for a lifecycle event under its writer
    /// lock. Contracts without a handler for the event are skipped.
    pub fn call_system_procedure(
        &self,
        contract: ContractIndex,
        id: SystemProcedureId,
    ) -> Result<(), ExecutorError> {
        let Some(&handler) = self.entry(contract)?.system_procedures.get(&id) else {
            return Ok(());
        };
        let ctx = QpiContext {
            current_contract_index: contract,
            current_contract_id: contract_id(contract),
            originator: [0; 32],
            invocation_reward: 0,
            stack_index: None,
            kind: CallKind::Procedure,
            executor: self,
            tail: RefCell::new(None),
        };
        let started = Instant::now();
        {
            let mut state = self.states[contract as usize].write();
            handler(&ctx, &mut state[..]);
        }
        self.record_execution(contract, started);
        self.mark_state_changed(contract);
        Ok(())
    }

    /// Runs a transaction-invoked procedure under the contract's writer
    /// lock. Returns the procedure's output bytes.
    ///
    /// The provided input may be shorter than the declared input size; the
    /// remainder of the input frame stays zeroed.
    pub fn call_user_procedure(
        &self,
        contract: ContractIndex,
        input_type: u16,
        input: &[u8],
        originator: PublicKey,
        invocation_reward: i64,
    ) -> Result<Vec<u8>, ExecutorError> {
        let def = *self
            .entry(contract)?
            .user_procedures
            .get(&input_type)
            .ok_or(ExecutorError::UnknownProcedure {
                contract,
                input_type,
            })?;

        let (stack_index, mut stack) = self.locals_pool.acquire(0)?;
        let (input_buf, output_buf, locals_buf, tail) = split_frame(
            &mut stack[..],
            input,
            def.input_size as usize,
            def.output_size as usize,
            def.locals_size as usize,
        )?;
        let ctx = QpiContext {
            current_contract_index: contract,
            current_contract_id: contract_id(contract),
            originator,
            invocation_reward,
            stack_index: Some(stack_index),
            kind: CallKind::Procedure,
            executor: self,
            tail: RefCell::new(Some(tail)),
        };

        let started = Instant::now();
        {
            let mut state = self.states[contract as usize].write();
            (def.handler)(&ctx, &mut state[..], input_buf, output_buf, locals_buf);
        }
        self.record_execution(contract, started);
        self.mark_state_changed(contract);
        Ok(output_buf.to_vec())
    }

    /// Runs a read-only query under the contract's reader lock. Returns the
    /// function's output bytes.
    ///
    /// Functions leave locals stack 0 to concurrent procedures, so a burst of
    /// queries never starves the writer path of scratch space.
    pub fn call_user_function(
        &self,
        contract: ContractIndex,
        input_type: u16,
        input: &[u8],
    ) -> Result<Vec<u8>, ExecutorError> {
        let def = *self
            .entry(contract)?
            .user_functions
            .get(&input_type)
            .ok_or(ExecutorError::UnknownFunction {
                contract,
                input_type,
            })?;

        let (stack_index, mut stack) = self.locals_pool.acquire(1)?;
        let (input_buf, output_buf, locals_buf, tail) = split_frame(
            &mut stack[..],
            input,
            def.input_size as usize,
            def.output_size as usize,
            def.locals_size as usize,
        )?;
        let ctx = QpiContext {
            current_contract_index: contract,
            current_contract_id: contract_id(contract),
            originator: [0; 32],
            invocation_reward: 0,
            stack_index: Some(stack_index),
            kind: CallKind::Function,
            executor: self,
            tail: RefCell::new(Some(tail)),
        };

        let started = Instant::now();
        {
            let state = self.states[contract as usize].read();
            (def.handler)(&ctx, &state[..], input_buf, output_buf, locals_buf);
        }
        self.record_execution(contract, started);
        Ok(output_buf.to_vec())
    }

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================

    /// Cumulative execution time of a contract, in monotonic counter ticks.
    pub fn contract_execution_ticks(&self, contract: ContractIndex) -> u64 {
        self.execution_ticks[contract as usize].load(Ordering::Relaxed)
    }

    /// Whether the contract's state changed since the flags were cleared.
    pub fn is_state_changed(&self, contract: ContractIndex) -> bool {
        let word = self.state_change_flags[contract as usize / 64].load(Ordering::Relaxed);
        word & (1u64 << (contract % 64)) != 0
    }

    /// Snapshot of the change bitmap, one bit per contract.
    pub fn state_change_flags(&self) -> Vec<u64> {
        self.state_change_flags
            .iter()
            .map(|word| word.load(Ordering::Relaxed))
            .collect()
    }

    /// Clears the change bitmap, typically right after a checkpoint consumed
    /// it.
    pub fn clear_state_change_flags(&self) {
        for word in self.state_change_flags.iter() {
            word.store(0, Ordering::Relaxed);
        }
        debug!("contract state change flags cleared");
    }

    /// Runs `f` against a contract's state under the reader lock.
    pub fn with_contract_state<R>(
        &self,
        contract: ContractIndex,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, ExecutorError> {
        self.entry(contract)?;
        let state = self.states[contract as usize].read();
        Ok(f(&state[..]))
    }
}

/// Carves `input | output | locals` out of the front of `buf`, zeroed, with
/// the caller's input bytes copied in. Returns the three frames plus the
/// remaining tail for sub-calls.
pub(crate) fn split_frame<'a>(
    buf: &'a mut [u8],
    input: &[u8],
    input_size: usize,
    output_size: usize,
    locals_size: usize,
) -> Result<(&'a mut [u8], &'a mut [u8], &'a mut [u8], &'a mut [u8]), ExecutorError> {
    let needed = input_size + output_size + locals_size;
    if needed > buf.len() {
        return Err(ExecutorError::StackFull {
            needed,
            available: buf.len(),
        });
    }
    let (frame, tail) = buf.split_at_mut(needed);
    frame.fill(0);
    let (input_buf, rest) = frame.split_at_mut(input_size);
    let (output_buf, locals_buf) = rest.split_at_mut(output_size);
    let copy = input.len().min(input_size);
    input_buf[..copy].copy_from_slice(&input[..copy]);
    Ok((input_buf, output_buf, locals_buf, tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AlwaysFunded;

    fn test_config() -> StorageConfig {
        StorageConfig {
            locals_stack_count: 2,
            locals_stack_size: 4096,
            ..StorageConfig::with_counts(200, 10, 4, 8)
        }
    }

    fn counter_begin_tick(_ctx: &QpiContext<'_>, state: &mut [u8]) {
        state[0] = state[0].wrapping_add(1);
    }

    fn echo_procedure(
        _ctx: &QpiContext<'_>,
        state: &mut [u8],
        input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        state[..input.len()].copy_from_slice(input);
        output.copy_from_slice(&input[..output.len()]);
    }

    fn read_state_function(
        _ctx: &QpiContext<'_>,
        state: &[u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        output.copy_from_slice(&state[..output.len()]);
    }

    fn executor_with(defs: Vec<ContractDef>) -> ContractExecutor {
        ContractExecutor::new(defs, &test_config(), Arc::new(AlwaysFunded)).unwrap()
    }

    #[test]
    fn system_procedure_mutates_state_and_sets_the_change_bit() {
        let executor = executor_with(vec![ContractDef::new(8)
            .with_system_procedure(SystemProcedureId::BeginTick, counter_begin_tick)]);

        assert!(!executor.is_state_changed(0));
        executor
            .call_system_procedure(0, SystemProcedureId::BeginTick)
            .unwrap();
        executor
            .call_system_procedure(0, SystemProcedureId::BeginTick)
            .unwrap();

        assert!(executor.is_state_changed(0));
        let counter = executor.with_contract_state(0, |state| state[0]).unwrap();
        assert_eq!(counter, 2);
    }

    #[test]
    fn unregistered_system_procedure_is_a_no_op() {
        let executor = executor_with(vec![ContractDef::new(8)]);
        executor
            .call_system_procedure(0, SystemProcedureId::EndEpoch)
            .unwrap();
        assert!(!executor.is_state_changed(0));
    }

    #[test]
    fn user_procedure_copies_short_input_and_zero_fills() {
        let executor = executor_with(vec![ContractDef::new(8).with_user_procedure(
            1,
            echo_procedure,
            4,
            4,
            0,
        )]);

        // Two input bytes provided, four declared: the rest stays zero.
        let output = executor
            .call_user_procedure(0, 1, &[0xAB, 0xCD], [0; 32], 0)
            .unwrap();
        assert_eq!(output, vec![0xAB, 0xCD, 0, 0]);
        assert!(executor.is_state_changed(0));
        let state = executor
            .with_contract_state(0, |state| state.to_vec())
            .unwrap();
        assert_eq!(&state[..4], &[0xAB, 0xCD, 0, 0]);
    }

    #[test]
    fn user_function_reads_without_setting_the_change_bit() {
        let executor = executor_with(vec![ContractDef::new(8)
            .with_user_procedure(1, echo_procedure, 4, 4, 0)
            .with_user_function(1, read_state_function, 0, 4, 0)]);

        executor
            .call_user_procedure(0, 1, &[9, 9, 9, 9], [0; 32], 0)
            .unwrap();
        executor.clear_state_change_flags();

        let output = executor.call_user_function(0, 1, &[]).unwrap();
        assert_eq!(output, vec![9, 9, 9, 9]);
        assert!(!executor.is_state_changed(0));
    }

    #[test]
    fn unknown_entry_points_are_rejected() {
        let executor = executor_with(vec![ContractDef::new(8)]);
        assert!(matches!(
            executor.call_user_procedure(0, 7, &[], [0; 32], 0),
            Err(ExecutorError::UnknownProcedure { contract: 0, input_type: 7 })
        ));
        assert!(matches!(
            executor.call_user_function(0, 7, &[]),
            Err(ExecutorError::UnknownFunction { contract: 0, input_type: 7 })
        ));
        assert!(matches!(
            executor.call_user_procedure(5, 0, &[], [0; 32], 0),
            Err(ExecutorError::InvalidContractIndex { index: 5, count: 1 })
        ));
    }

    #[test]
    fn oversized_frame_aborts_with_stack_full() {
        let config = StorageConfig {
            locals_stack_count: 2,
            locals_stack_size: 16,
            ..test_config()
        };
        let executor = ContractExecutor::new(
            vec![ContractDef::new(8).with_user_procedure(1, echo_procedure, 4, 4, 1024)],
            &config,
            Arc::new(AlwaysFunded),
        )
        .unwrap();
        assert!(matches!(
            executor.call_user_procedure(0, 1, &[], [0; 32], 0),
            Err(ExecutorError::StackFull { .. })
        ));
    }

    #[test]
    fn change_bitmap_uses_one_bit_per_contract() {
        let defs = (0..3)
            .map(|_| ContractDef::new(4).with_system_procedure(SystemProcedureId::EndTick, counter_begin_tick))
            .collect();
        let executor = executor_with(defs);
        executor
            .call_system_procedure(2, SystemProcedureId::EndTick)
            .unwrap();
        assert!(!executor.is_state_changed(0));
        assert!(!executor.is_state_changed(1));
        assert!(executor.is_state_changed(2));
        assert_eq!(executor.state_change_flags(), vec![0b100]);
        executor.clear_state_change_flags();
        assert_eq!(executor.state_change_flags(), vec![0]);
    }
}
