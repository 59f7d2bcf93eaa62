//! Per-invocation contract context.
//!
//! One [`QpiContext`] exists for the duration of one contract call. It tells
//! the contract who invoked it and with what reward, and it is the only door
//! to other contracts: sub-calls go through [`QpiContext::invoke_procedure`]
//! and [`QpiContext::invoke_function`].
//!
//! Sub-call frames are carved out of the unused tail of the same locals
//! stack the outer call runs on. The tail travels through the context as a
//! reborrowable slice, so a sub-call's frames exist exactly while the
//! sub-call runs and the space returns to the caller when it ends; stack
//! discipline is enforced by the borrow checker instead of a bump pointer.

use std::cell::RefCell;
use std::time::Instant;

use shared_types::PublicKey;

use crate::errors::ExecutorError;
use crate::executor::{contract_id, split_frame, ContractExecutor, ContractIndex};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CallKind {
    /// State-mutating call path; holds the contract's writer lock.
    Procedure,
    /// Read-only call path; holds the contract's reader lock.
    Function,
}

/// Execution context handed to every contract handler.
pub struct QpiContext<'a> {
    /// Contract being executed.
    pub current_contract_index: ContractIndex,
    /// 256-bit identity of the contract being executed.
    pub current_contract_id: PublicKey,
    /// Identity that started the outermost call of this chain.
    pub originator: PublicKey,
    /// Reward transferred to this contract for the invocation.
    pub invocation_reward: i64,
    /// Locals stack slot the call chain runs on; `None` for lifecycle calls,
    /// which allocate no scratch frames.
    pub stack_index: Option<usize>,

    pub(crate) kind: CallKind,
    pub(crate) executor: &'a ContractExecutor,
    pub(crate) tail: RefCell<Option<&'a mut [u8]>>,
}

impl<'a> QpiContext<'a> {
    /// Invokes a procedure of a lower-indexed contract.
    ///
    /// The reward is settled with the balance ledger first; if the transfer
    /// reports insufficient funds the callee sees a reward of zero. The
    /// callee runs under its own writer lock and its change bit is set on
    /// return. Output bytes are copied into `output` (truncated to whichever
    /// is shorter).
    pub fn invoke_procedure(
        &self,
        target: ContractIndex,
        input_type: u16,
        input: &[u8],
        output: &mut [u8],
        invocation_reward: i64,
    ) -> Result<(), ExecutorError> {
        if self.kind == CallKind::Function {
            return Err(ExecutorError::MutatingCallFromFunction);
        }
        self.check_target(target)?;
        let executor = self.executor;
        let def = *executor
            .entry(target)?
            .user_procedures
            .get(&input_type)
            .ok_or(ExecutorError::UnknownProcedure {
                contract: target,
                input_type,
            })?;

        let mut reward = invocation_reward;
        if executor.balances().transfer(contract_id(target), reward) < 0 {
            reward = 0;
        }

        let mut tail_slot = self.tail.borrow_mut();
        let tail = tail_slot
            .as_deref_mut()
            .ok_or(ExecutorError::StackFull {
                needed: def.frame_size(),
                available: 0,
            })?;
        let (input_buf, output_buf, locals_buf, rest) = split_frame(
            tail,
            input,
            def.input_size as usize,
            def.output_size as usize,
            def.locals_size as usize,
        )?;
        let sub_ctx = QpiContext {
            current_contract_index: target,
            current_contract_id: contract_id(target),
            originator: self.originator,
            invocation_reward: reward,
            stack_index: self.stack_index,
            kind: CallKind::Procedure,
            executor,
            tail: RefCell::new(Some(rest)),
        };

        let started = Instant::now();
        {
            let mut state = executor.state_lock(target).write();
            (def.handler)(&sub_ctx, &mut state[..], input_buf, output_buf, locals_buf);
        }
        executor.record_execution(target, started);
        executor.mark_state_changed(target);

        let copy = output.len().min(output_buf.len());
        output[..copy].copy_from_slice(&output_buf[..copy]);
        Ok(())
    }

    /// Invokes a read-only function of a lower-indexed contract. Allowed
    /// from procedures and functions alike; the callee runs under the
    /// target's reader lock and cannot mutate anything.
    pub fn invoke_function(
        &self,
        target: ContractIndex,
        input_type: u16,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), ExecutorError> {
        self.check_target(target)?;
        let executor = self.executor;
        let def = *executor
            .entry(target)?
            .user_functions
            .get(&input_type)
            .ok_or(ExecutorError::UnknownFunction {
                contract: target,
                input_type,
            })?;

        let mut tail_slot = self.tail.borrow_mut();
        let tail = tail_slot
            .as_deref_mut()
            .ok_or(ExecutorError::StackFull {
                needed: def.frame_size(),
                available: 0,
            })?;
        let (input_buf, output_buf, locals_buf, rest) = split_frame(
            tail,
            input,
            def.input_size as usize,
            def.output_size as usize,
            def.locals_size as usize,
        )?;
        let sub_ctx = QpiContext {
            current_contract_index: target,
            current_contract_id: contract_id(target),
            originator: self.originator,
            invocation_reward: 0,
            stack_index: self.stack_index,
            kind: CallKind::Function,
            executor,
            tail: RefCell::new(Some(rest)),
        };

        let started = Instant::now();
        {
            let state = executor.state_lock(target).read();
            (def.handler)(&sub_ctx, &state[..], input_buf, output_buf, locals_buf);
        }
        executor.record_execution(target, started);

        let copy = output.len().min(output_buf.len());
        output[..copy].copy_from_slice(&output_buf[..copy]);
        Ok(())
    }

    // Sub-calls go strictly down the contract registry. Together with the
    // lock acquisition inside the call paths this totally orders state
    // locks, so a chain of re-entrant calls cannot deadlock.
    fn check_target(&self, target: ContractIndex) -> Result<(), ExecutorError> {
        if target >= self.current_contract_index {
            return Err(ExecutorError::InvalidSubcallTarget {
                contract: self.current_contract_index,
                target,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shared_types::StorageConfig;

    use super::*;
    use crate::executor::{ContractDef, SystemProcedureId};
    use crate::ports::BalanceTransfer;

    struct Broke;

    impl BalanceTransfer for Broke {
        fn transfer(&self, _contract_id: PublicKey, _amount: i64) -> i64 {
            -1
        }
    }

    fn test_config() -> StorageConfig {
        StorageConfig {
            locals_stack_count: 2,
            locals_stack_size: 4096,
            ..StorageConfig::with_counts(200, 10, 4, 8)
        }
    }

    // Contract 0: stores the reward it was invoked with into its state.
    fn store_reward(
        ctx: &QpiContext<'_>,
        state: &mut [u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        state[..8].copy_from_slice(&ctx.invocation_reward.to_le_bytes());
        output[..8].copy_from_slice(&ctx.invocation_reward.to_le_bytes());
    }

    // Contract 0: reports its stored reward.
    fn report_reward(
        _ctx: &QpiContext<'_>,
        state: &[u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        output[..8].copy_from_slice(&state[..8]);
    }

    // Contract 1: forwards the reward carried in its input to contract 0.
    fn forward_reward(
        ctx: &QpiContext<'_>,
        state: &mut [u8],
        input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        let reward = i64::from_le_bytes(input[..8].try_into().unwrap());
        let mut sub_output = [0u8; 8];
        ctx.invoke_procedure(0, 1, &[], &mut sub_output, reward)
            .unwrap();
        state[0] = 1;
        output[..8].copy_from_slice(&sub_output);
    }

    // Contract 1: queries contract 0 from a read-only function.
    fn query_downstream(
        ctx: &QpiContext<'_>,
        _state: &[u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        let mut sub_output = [0u8; 8];
        ctx.invoke_function(0, 1, &[], &mut sub_output).unwrap();
        output[..8].copy_from_slice(&sub_output);
    }

    // Contract 1: a read-only function trying to mutate contract 0.
    fn illegal_mutation(
        ctx: &QpiContext<'_>,
        _state: &[u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        let err = ctx
            .invoke_procedure(0, 1, &[], &mut [], 0)
            .unwrap_err();
        output[0] = matches!(err, ExecutorError::MutatingCallFromFunction) as u8;
    }

    // Contract 0: tries to call upward to contract 1.
    fn illegal_upcall(
        ctx: &QpiContext<'_>,
        _state: &mut [u8],
        _input: &[u8],
        output: &mut [u8],
        _locals: &mut [u8],
    ) {
        let err = ctx.invoke_procedure(1, 1, &[], &mut [], 0).unwrap_err();
        output[0] = matches!(err, ExecutorError::InvalidSubcallTarget { .. }) as u8;
    }

    fn registry() -> Vec<ContractDef> {
        vec![
            ContractDef::new(16)
                .with_user_procedure(1, store_reward, 0, 8, 0)
                .with_user_function(1, report_reward, 0, 8, 0),
            ContractDef::new(16)
                .with_user_procedure(1, forward_reward, 8, 8, 0)
                .with_user_function(2, query_downstream, 0, 8, 0)
                .with_user_function(3, illegal_mutation, 0, 1, 0),
        ]
    }

    #[test]
    fn cross_contract_procedure_transfers_the_reward() {
        let executor =
            ContractExecutor::new(registry(), &test_config(), Arc::new(crate::adapters::AlwaysFunded))
                .unwrap();
        let output = executor
            .call_user_procedure(1, 1, &42i64.to_le_bytes(), [9; 32], 0)
            .unwrap();
        assert_eq!(i64::from_le_bytes(output[..8].try_into().unwrap()), 42);

        // Both the caller and the callee changed state.
        assert!(executor.is_state_changed(0));
        assert!(executor.is_state_changed(1));
    }

    #[test]
    fn insufficient_funds_clamp_the_callee_reward_to_zero() {
        let executor = ContractExecutor::new(registry(), &test_config(), Arc::new(Broke)).unwrap();
        let output = executor
            .call_user_procedure(1, 1, &42i64.to_le_bytes(), [9; 32], 0)
            .unwrap();
        assert_eq!(i64::from_le_bytes(output[..8].try_into().unwrap()), 0);
        assert!(executor.is_state_changed(0));
        assert!(executor.is_state_changed(1));
    }

    #[test]
    fn functions_can_query_downstream_contracts() {
        let executor =
            ContractExecutor::new(registry(), &test_config(), Arc::new(crate::adapters::AlwaysFunded))
                .unwrap();
        executor
            .call_user_procedure(1, 1, &7i64.to_le_bytes(), [9; 32], 0)
            .unwrap();
        executor.clear_state_change_flags();

        let output = executor.call_user_function(1, 2, &[]).unwrap();
        assert_eq!(i64::from_le_bytes(output[..8].try_into().unwrap()), 7);
        assert!(!executor.is_state_changed(0));
        assert!(!executor.is_state_changed(1));
    }

    #[test]
    fn read_only_contexts_cannot_mutate() {
        let executor =
            ContractExecutor::new(registry(), &test_config(), Arc::new(crate::adapters::AlwaysFunded))
                .unwrap();
        let output = executor.call_user_function(1, 3, &[]).unwrap();
        assert_eq!(output, vec![1]);
    }

    #[test]
    fn upward_calls_are_rejected() {
        let defs = vec![
            ContractDef::new(8).with_user_procedure(9, illegal_upcall, 0, 1, 0),
            ContractDef::new(8),
        ];
        let executor =
            ContractExecutor::new(defs, &test_config(), Arc::new(crate::adapters::AlwaysFunded))
                .unwrap();
        let output = executor.call_user_procedure(0, 9, &[], [0; 32], 0).unwrap();
        assert_eq!(output, vec![1]);
    }

    #[test]
    fn lifecycle_contexts_have_no_scratch_tail() {
        fn begin_epoch_subcall(ctx: &QpiContext<'_>, state: &mut [u8]) {
            let err = ctx.invoke_procedure(0, 1, &[], &mut [], 0).unwrap_err();
            state[0] = matches!(err, ExecutorError::StackFull { .. }) as u8;
        }
        let defs = vec![
            ContractDef::new(8).with_user_procedure(1, store_reward, 0, 8, 0),
            ContractDef::new(8).with_system_procedure(SystemProcedureId::BeginEpoch, begin_epoch_subcall),
        ];
        let executor =
            ContractExecutor::new(defs, &test_config(), Arc::new(crate::adapters::AlwaysFunded))
                .unwrap();
        executor
            .call_system_procedure(1, SystemProcedureId::BeginEpoch)
            .unwrap();
        let flag = executor.with_contract_state(1, |state| state[0]).unwrap();
        assert_eq!(flag, 1);
    }
}
