//! Single-vault withdrawal execution
//!
//! Every step goes through the gateway, so it shares the rate limiter and
//! retry policy with the background loops. Nothing is persisted here: the
//! coordinator decides ledger membership from the returned result.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain::abi::{self, selectors};
use crate::chain::{TransactionRequest, TxReceipt, VaultGateway};
use crate::config::WithdrawalConfig;
use crate::error::{Error, Result};
use crate::types::{format_ether, Address};

/// Confirmed withdrawal
#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub vault: Address,
    /// Balance observed right before submission
    pub amount: u128,
    pub receipt: TxReceipt,
}

pub struct WithdrawalExecutor {
    gateway: Arc<VaultGateway>,
    expected_chain_id: u64,
    gas_margin_pct: u64,
}

impl WithdrawalExecutor {
    pub fn new(gateway: Arc<VaultGateway>, expected_chain_id: u64, config: &WithdrawalConfig) -> Self {
        Self {
            gateway,
            expected_chain_id,
            gas_margin_pct: config.gas_margin_pct,
        }
    }

    /// Fail unless connected to the configured chain
    pub async fn ensure_network(&self) -> Result<()> {
        let actual = self.gateway.chain_id().await?;
        if actual != self.expected_chain_id {
            return Err(Error::InvalidNetwork {
                expected: self.expected_chain_id,
                actual,
            });
        }
        Ok(())
    }

    /// Withdraw the full balance of an unlocked vault and wait for confirmation
    pub async fn withdraw(&self, vault: Address) -> Result<WithdrawalReceipt> {
        self.ensure_network().await?;

        let status = self.gateway.lock_status(vault).await?;
        if status.is_locked {
            return Err(Error::StillLocked {
                vault: vault.to_string(),
                reason: status.unlock_reason,
            });
        }

        let amount = self.gateway.vault_balance(vault).await?;
        if amount == 0 {
            return Err(Error::InsufficientFunds(format!(
                "vault {} has nothing to withdraw",
                vault
            )));
        }

        let from = self.gateway.signer()?.address();
        let tx = TransactionRequest::call(from, vault, abi::encode_call(selectors::WITHDRAW, &[]));

        info!("Withdrawing {} ETH from {}", format_ether(amount), vault);
        let receipt = self.send(tx).await?;

        // Confirmed from here on; the post-check only warns
        match self.gateway.vault_balance(vault).await {
            Ok(0) => {}
            Ok(remaining) => warn!(
                "Withdrawal {} confirmed but {} still holds {} ETH",
                receipt.tx_hash,
                vault,
                format_ether(remaining)
            ),
            Err(e) => warn!(
                "Withdrawal {} confirmed but re-reading {} failed: {}",
                receipt.tx_hash, vault, e
            ),
        }

        Ok(WithdrawalReceipt {
            vault,
            amount,
            receipt,
        })
    }

    /// Estimate with margin, price, submit and wait for confirmation
    pub async fn send(&self, mut tx: TransactionRequest) -> Result<TxReceipt> {
        let estimate = self.gateway.estimate_gas(&tx).await?;
        let gas_limit = with_margin(estimate, self.gas_margin_pct);
        let fees = self.gateway.fee_params().await?;
        debug!(
            "Gas estimate {} -> limit {} ({:?})",
            estimate, gas_limit, fees
        );

        tx.gas_limit = Some(gas_limit);
        tx.fees = Some(fees);

        let hash = self.gateway.submit(&tx).await?;
        let receipt = self.gateway.wait_for_confirmation(hash).await?;
        info!(
            "Transaction {} confirmed in block {} (gas used {})",
            receipt.tx_hash, receipt.block_number, receipt.gas_used
        );
        Ok(receipt)
    }
}

/// `estimate * (100 + pct) / 100`, rounded down
pub fn with_margin(estimate: u64, pct: u64) -> u64 {
    let scaled = estimate as u128 * (100 + pct as u128) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{MockChain, TestHarness, GAS_ESTIMATE};
    use crate::types::WEI_PER_ETH;

    #[test]
    fn test_gas_margin() {
        assert_eq!(with_margin(50_000, 20), 60_000);
        assert_eq!(with_margin(21_001, 20), 25_201);
        assert_eq!(with_margin(100, 0), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_unlocked_vault() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(2 * WEI_PER_ETH, 0);
        let harness = TestHarness::new(chain.clone());

        let result = harness.executor.withdraw(vault).await.unwrap();
        assert_eq!(result.amount, 2 * WEI_PER_ETH);
        assert!(result.receipt.success);
        assert_eq!(chain.vault(vault).unwrap().balance, 0);

        let submitted = chain.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].gas_limit, Some(GAS_ESTIMATE * 120 / 100));
        assert!(submitted[0].fees.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_locked_is_not_submitted() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 3600);
        let harness = TestHarness::new(chain.clone());

        let err = harness.executor.withdraw(vault).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StillLocked);
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_vault_is_insufficient_funds() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(0, 0);
        let harness = TestHarness::new(chain.clone());

        let err = harness.executor.withdraw(vault).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_network() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 0);
        chain.set_chain_id(1);
        let harness = TestHarness::new(chain.clone());

        let err = harness.executor.withdraw(vault).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidNetwork);
        assert_eq!(chain.calls("lock_status"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signer_unavailable() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 0);
        let harness = TestHarness::new(chain.clone());
        harness.gateway.clear_signer().unwrap();

        let err = harness.executor.withdraw(vault).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignerUnavailable);
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_post_check_still_succeeds() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 0);
        chain.fail_reads_after_withdraw(Error::RpcTimeout(30_000), u32::MAX);
        let harness = TestHarness::new(chain.clone());

        let result = harness.executor.withdraw(vault).await.unwrap();
        assert_eq!(result.amount, WEI_PER_ETH);
        assert!(result.receipt.success);
        assert_eq!(chain.submitted(selectors::WITHDRAW), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_balance_still_succeeds() {
        let chain = MockChain::new();
        let vault = chain.add_time_vault(WEI_PER_ETH, 0);
        chain.withdraw_leaves_balance();
        let harness = TestHarness::new(chain.clone());

        let result = harness.executor.withdraw(vault).await.unwrap();
        assert_eq!(result.amount, WEI_PER_ETH);
        assert_eq!(chain.vault(vault).unwrap().balance, WEI_PER_ETH);
    }
}
