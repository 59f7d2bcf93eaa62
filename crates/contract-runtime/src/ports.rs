//! Outbound collaborator interfaces.

use shared_types::PublicKey;

/// Balance ledger boundary.
///
/// The runtime only ever moves invocation rewards; the ledger itself (who
/// holds what) lives in another subsystem.
pub trait BalanceTransfer: Send + Sync {
    /// Transfers `amount` to the contract identity. Returns the signed amount
    /// actually transferred; negative when the payer cannot cover it, in
    /// which case the runtime clamps the callee's reward to zero.
    fn transfer(&self, contract_id: PublicKey, amount: i64) -> i64;
}
