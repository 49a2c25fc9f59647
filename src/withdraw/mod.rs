//! Withdrawal execution, idempotency ledger and the auto-withdraw loop

pub mod coordinator;
pub mod executor;
pub mod ledger;

pub use coordinator::{AutoWithdrawCoordinator, TickReport};
pub use executor::{WithdrawalExecutor, WithdrawalReceipt};
pub use ledger::WithdrawalLedger;
