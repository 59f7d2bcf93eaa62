//! Collaborator adapters.

use shared_types::PublicKey;

use crate::ports::BalanceTransfer;

/// Balance adapter that honors every transfer in full. Useful for wiring the
/// runtime before a real ledger is attached, and for tests that do not care
/// about funds.
pub struct AlwaysFunded;

impl BalanceTransfer for AlwaysFunded {
    fn transfer(&self, _contract_id: PublicKey, amount: i64) -> i64 {
        amount
    }
}
