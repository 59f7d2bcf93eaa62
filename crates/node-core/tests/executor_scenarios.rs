//! End-to-end contract runtime scenarios: cross-contract reward clamping
//! and writer-priority stack reservation under contention.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use contract_runtime::{
    BalanceTransfer, ContractDef, ContractExecutor, ExecutorError, QpiContext,
};
use node_core::NodeStore;
use shared_types::{PublicKey, StorageConfig};

fn test_config() -> StorageConfig {
    StorageConfig {
        locals_stack_count: 2,
        locals_stack_size: 4096,
        ..StorageConfig::with_counts(200, 10, 4, 8)
    }
}

// =============================================================================
// CROSS-CONTRACT REWARD CLAMPING
// =============================================================================

struct Broke;

impl BalanceTransfer for Broke {
    fn transfer(&self, _contract_id: PublicKey, _amount: i64) -> i64 {
        -1
    }
}

fn record_reward(
    ctx: &QpiContext<'_>,
    state: &mut [u8],
    _input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
    state[..8].copy_from_slice(&ctx.invocation_reward.to_le_bytes());
}

fn call_downstream_with_reward(
    ctx: &QpiContext<'_>,
    state: &mut [u8],
    input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
    let reward = i64::from_le_bytes(input[..8].try_into().unwrap());
    ctx.invoke_procedure(0, 1, &[], &mut [], reward).unwrap();
    state[0] = 1;
}

#[test]
fn failed_reward_transfer_reaches_the_callee_as_zero() {
    let contracts = vec![
        ContractDef::new(8).with_user_procedure(1, record_reward, 0, 0, 0),
        ContractDef::new(8).with_user_procedure(1, call_downstream_with_reward, 8, 0, 0),
    ];
    let mut node = NodeStore::new(test_config(), contracts, Arc::new(Broke)).unwrap();
    node.begin_epoch(1000);

    node.executor()
        .call_user_procedure(1, 1, &500i64.to_le_bytes(), [7; 32], 0)
        .unwrap();

    let reward = node
        .executor()
        .with_contract_state(0, |state| i64::from_le_bytes(state[..8].try_into().unwrap()))
        .unwrap();
    assert_eq!(reward, 0);

    // Both contracts took a writer lock, so both change bits are set.
    assert!(node.executor().is_state_changed(0));
    assert!(node.executor().is_state_changed(1));
}

// =============================================================================
// STACK RESERVATION UNDER CONTENTION
// =============================================================================

static RELEASE_READERS: AtomicBool = AtomicBool::new(false);
static READERS_INSIDE: AtomicUsize = AtomicUsize::new(0);

fn blocking_function(
    _ctx: &QpiContext<'_>,
    _state: &[u8],
    _input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
    READERS_INSIDE.fetch_add(1, Ordering::AcqRel);
    while !RELEASE_READERS.load(Ordering::Acquire) {
        thread::yield_now();
    }
}

fn trivial_procedure(
    _ctx: &QpiContext<'_>,
    state: &mut [u8],
    _input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
    state[0] = 1;
}

#[test]
fn procedure_gets_the_reserved_stack_while_functions_saturate_the_rest() {
    // Contract 0 carries the blocking query, contract 1 the writer path, so
    // the only shared resource between the two calls is the stack pool.
    let contracts = vec![
        ContractDef::new(8).with_user_function(1, blocking_function, 0, 0, 0),
        ContractDef::new(8).with_user_procedure(1, trivial_procedure, 0, 0, 0),
    ];
    let executor = Arc::new(
        ContractExecutor::new(contracts, &test_config(), Arc::new(Broke)).unwrap(),
    );

    // With two stacks, a single function call saturates every slot functions
    // may use: slot 0 is reserved for the writer path.
    let reader_executor = Arc::clone(&executor);
    let reader = thread::spawn(move || reader_executor.call_user_function(0, 1, &[]).unwrap());

    while READERS_INSIDE.load(Ordering::Acquire) == 0 {
        thread::yield_now();
    }

    // The procedure must complete while the function still holds its stack.
    executor.call_user_procedure(1, 1, &[], [0; 32], 0).unwrap();
    assert!(executor.is_state_changed(1));
    assert_eq!(READERS_INSIDE.load(Ordering::Acquire), 1);

    RELEASE_READERS.store(true, Ordering::Release);
    reader.join().unwrap();
}

// =============================================================================
// LOCK MODES
// =============================================================================

#[test]
fn function_and_procedure_lock_modes_do_not_interfere_across_contracts() {
    let contracts = vec![
        ContractDef::new(8)
            .with_user_procedure(1, trivial_procedure, 0, 0, 0)
            .with_user_function(2, noop_function, 0, 0, 0),
        ContractDef::new(8).with_user_procedure(1, trivial_procedure, 0, 0, 0),
    ];
    let mut node = NodeStore::new(test_config(), contracts, Arc::new(Broke)).unwrap();
    node.begin_epoch(1000);

    node.executor().call_user_procedure(0, 1, &[], [0; 32], 0).unwrap();
    node.executor().call_user_function(0, 2, &[]).unwrap();
    node.executor().call_user_procedure(1, 1, &[], [0; 32], 0).unwrap();

    assert!(node.executor().is_state_changed(0));
    assert!(node.executor().is_state_changed(1));
    assert!(matches!(
        node.executor().call_user_function(1, 2, &[]),
        Err(ExecutorError::UnknownFunction { contract: 1, input_type: 2 })
    ));
}

fn noop_function(
    _ctx: &QpiContext<'_>,
    _state: &[u8],
    _input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
}
