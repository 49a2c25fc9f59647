//! Vault snapshot reader
//!
//! Reads one vault's balance and lock state through the gateway and
//! classifies failures:
//! - empty revert data on a call exception: the address is not a
//!   compatible vault, so the caller drops it permanently;
//! - anything else (timeouts, throttling, generic RPC errors): the vault
//!   stays visible as a `pending` placeholder and is read again next cycle.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chain::VaultGateway;
use crate::error::Result;
use crate::types::Address;
use crate::vault::types::{LockKind, SnapshotOutcome, Vault};

/// Produces point-in-time vault snapshots
pub struct SnapshotReader {
    gateway: Arc<VaultGateway>,
}

impl SnapshotReader {
    pub fn new(gateway: Arc<VaultGateway>) -> Self {
        Self { gateway }
    }

    /// Read and classify; `known_kind` fills the placeholder's lock kind
    pub async fn read(&self, address: Address, known_kind: Option<LockKind>) -> SnapshotOutcome {
        match self.fetch(address).await {
            Ok(vault) => {
                debug!(
                    "Snapshot {}: balance={} locked={} kind={}",
                    address, vault.balance, vault.is_locked, vault.lock_kind
                );
                SnapshotOutcome::Fresh(vault)
            }
            Err(e) if e.is_missing_contract() => {
                warn!("{} is not a compatible vault, dropping it: {}", address, e);
                SnapshotOutcome::Retired {
                    address,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!("Snapshot of {} failed, keeping placeholder: {}", address, e);
                SnapshotOutcome::Pending {
                    vault: Vault::placeholder(address, known_kind.unwrap_or_default()),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// All reads of one snapshot; any failure fails the snapshot
    pub async fn fetch(&self, address: Address) -> Result<Vault> {
        let gw = &self.gateway;
        let (balance, unlock_time, creator, target_price, status, round) = futures::try_join!(
            gw.vault_balance(address),
            gw.unlock_time(address),
            gw.creator(address),
            gw.target_price(address),
            gw.lock_status(address),
            gw.latest_price(),
        )?;

        Ok(Vault::from_reads(
            address,
            balance,
            unlock_time,
            creator,
            target_price,
            status,
            round.price,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, TestHarness};
    use crate::types::WEI_PER_ETH;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_snapshot() {
        let chain = MockChain::new();
        let vault = chain.add_goal_vault(WEI_PER_ETH / 2, WEI_PER_ETH);
        let harness = TestHarness::new(chain.clone());

        match harness.reader.read(vault, None).await {
            SnapshotOutcome::Fresh(v) => {
                assert_eq!(v.lock_kind, LockKind::Goal);
                assert_eq!(v.progress_percentage, 50.0);
                assert!(v.is_locked);
                assert_eq!(v.balance, WEI_PER_ETH / 2);
            }
            other => panic!("expected fresh snapshot, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_contract_is_retired() {
        let chain = MockChain::new();
        let harness = TestHarness::new(chain.clone());
        let bogus = MockChain::address(0xee);

        let outcome = harness.reader.read(bogus, None).await;
        assert!(matches!(outcome, SnapshotOutcome::Retired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_placeholder() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 3600);
        chain.fail_vault(vault, crate::error::Error::RpcTimeout(30_000), u32::MAX);
        let harness = TestHarness::new(chain.clone());

        match harness.reader.read(vault, Some(LockKind::Time)).await {
            SnapshotOutcome::Pending { vault: v, .. } => {
                assert!(v.is_placeholder());
                assert!(v.is_locked);
                assert_eq!(v.balance, 0);
                assert_eq!(v.unlock_reason, "pending");
            }
            other => panic!("expected placeholder, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_read_recovers_within_retries() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 0);
        chain.fail_vault(
            vault,
            crate::error::Error::RateLimited("429 Too Many Requests".into()),
            2,
        );
        let harness = TestHarness::new(chain.clone());

        let outcome = harness.reader.read(vault, None).await;
        match outcome {
            SnapshotOutcome::Fresh(v) => assert!(!v.is_locked),
            other => panic!("expected fresh snapshot, got {:?}", other),
        }
    }
}
