//! Session ledger of automatic withdrawals
//!
//! A vault enters the ledger only after its withdrawal confirmed; once in,
//! the coordinator never submits for it again this session. Failed attempts
//! are counted separately so an optional attempt bound can be applied.

use dashmap::{DashMap, DashSet};

use crate::types::Address;

#[derive(Default)]
pub struct WithdrawalLedger {
    succeeded: DashSet<Address>,
    failures: DashMap<Address, u32>,
}

impl WithdrawalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, vault: &Address) -> bool {
        self.succeeded.contains(vault)
    }

    /// Record a confirmed withdrawal; false if it was already recorded
    pub fn record_success(&self, vault: Address) -> bool {
        self.failures.remove(&vault);
        self.succeeded.insert(vault)
    }

    /// Count a failed attempt, returning the running total
    pub fn record_failure(&self, vault: Address) -> u32 {
        let mut count = self.failures.entry(vault).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, vault: &Address) -> u32 {
        self.failures.get(vault).map(|c| *c).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.succeeded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty()
    }

    pub fn succeeded(&self) -> Vec<Address> {
        self.succeeded.iter().map(|a| *a).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_recorded_once() {
        let ledger = WithdrawalLedger::new();
        let vault = Address([1u8; 20]);

        assert!(!ledger.contains(&vault));
        assert!(ledger.record_success(vault));
        assert!(!ledger.record_success(vault));
        assert!(ledger.contains(&vault));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_failures_do_not_enter_ledger() {
        let ledger = WithdrawalLedger::new();
        let vault = Address([2u8; 20]);

        assert_eq!(ledger.record_failure(vault), 1);
        assert_eq!(ledger.record_failure(vault), 2);
        assert!(!ledger.contains(&vault));
        assert_eq!(ledger.failures(&vault), 2);

        ledger.record_success(vault);
        assert_eq!(ledger.failures(&vault), 0);
    }
}
