//! Rate-limited, retrying access to the chain and the active signer
//!
//! The only path from engine components to the node. Each method is one
//! resilient call, so every read, estimate, submission and receipt poll
//! takes a slot from the shared limiter.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::chain::{
    FeeParams, LockStatus, OracleRound, Signer, TransactionRequest, TxReceipt, VaultChain,
};
use crate::config::WithdrawalConfig;
use crate::error::{Error, Result};
use crate::rpc::ResilientCaller;
use crate::types::{Address, TxHash};

/// Chain access shared by the snapshot reader, registry, executor and engine
pub struct VaultGateway {
    chain: Arc<dyn VaultChain>,
    caller: Arc<ResilientCaller>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    confirmation_poll: Duration,
    confirmation_timeout: Duration,
}

impl VaultGateway {
    pub fn new(
        chain: Arc<dyn VaultChain>,
        caller: Arc<ResilientCaller>,
        config: &WithdrawalConfig,
    ) -> Self {
        Self {
            chain,
            caller,
            signer: RwLock::new(None),
            confirmation_poll: Duration::from_millis(config.confirmation_poll_ms),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }

    pub fn caller(&self) -> &Arc<ResilientCaller> {
        &self.caller
    }

    // === Active signer ===

    pub fn set_signer(&self, signer: Arc<dyn Signer>) -> Result<()> {
        let mut slot = self
            .signer
            .write()
            .map_err(|e| Error::Internal(format!("Failed to acquire signer lock: {}", e)))?;
        info!("Active account set to {}", signer.address());
        *slot = Some(signer);
        Ok(())
    }

    pub fn clear_signer(&self) -> Result<()> {
        let mut slot = self
            .signer
            .write()
            .map_err(|e| Error::Internal(format!("Failed to acquire signer lock: {}", e)))?;
        if let Some(old) = slot.take() {
            info!("Active account {} cleared", old.address());
        }
        Ok(())
    }

    /// Current signer, or `SignerUnavailable`
    pub fn signer(&self) -> Result<Arc<dyn Signer>> {
        self.signer
            .read()
            .map_err(|e| Error::Internal(format!("Failed to acquire signer lock: {}", e)))?
            .clone()
            .ok_or(Error::SignerUnavailable)
    }

    pub fn has_signer(&self) -> bool {
        self.signer().is_ok()
    }

    // === Reads ===

    pub async fn chain_id(&self) -> Result<u64> {
        self.caller.call("chain_id", || self.chain.chain_id()).await
    }

    pub async fn user_vaults(&self, account: Address) -> Result<Vec<Address>> {
        self.caller
            .call("user_vaults", || self.chain.user_vaults(account))
            .await
    }

    pub async fn vault_balance(&self, vault: Address) -> Result<u128> {
        self.caller
            .call("vault_balance", || self.chain.vault_balance(vault))
            .await
    }

    pub async fn unlock_time(&self, vault: Address) -> Result<u64> {
        self.caller
            .call("unlock_time", || self.chain.unlock_time(vault))
            .await
    }

    pub async fn creator(&self, vault: Address) -> Result<Address> {
        self.caller
            .call("creator", || self.chain.creator(vault))
            .await
    }

    pub async fn target_price(&self, vault: Address) -> Result<u128> {
        self.caller
            .call("target_price", || self.chain.target_price(vault))
            .await
    }

    pub async fn lock_status(&self, vault: Address) -> Result<LockStatus> {
        self.caller
            .call("lock_status", || self.chain.lock_status(vault))
            .await
    }

    pub async fn latest_price(&self) -> Result<OracleRound> {
        self.caller
            .call("latest_price", || self.chain.latest_price())
            .await
    }

    pub fn factory(&self) -> Result<Address> {
        self.chain.factory()
    }

    // === Writes ===

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        self.caller
            .call("estimate_gas", || self.chain.estimate_gas(tx))
            .await
    }

    pub async fn fee_params(&self) -> Result<FeeParams> {
        self.caller
            .call("fee_params", || self.chain.fee_params())
            .await
    }

    /// Sign and broadcast with the active signer
    pub async fn submit(&self, tx: &TransactionRequest) -> Result<TxHash> {
        let signer = self.signer()?;
        self.caller
            .call_write("submit", || signer.sign_and_submit(tx.clone()))
            .await
    }

    pub async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        self.caller
            .call("receipt", || self.chain.transaction_receipt(hash))
            .await
    }

    /// Poll until the transaction is mined; a failed status is an error
    pub async fn wait_for_confirmation(&self, hash: TxHash) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            if let Some(receipt) = self.receipt(hash).await? {
                if !receipt.success {
                    return Err(Error::TransactionReverted(hash.to_string()));
                }
                debug!(
                    "Transaction {} confirmed in block {}",
                    hash, receipt.block_number
                );
                return Ok(receipt);
            }

            if Instant::now() >= deadline {
                return Err(Error::ConfirmationTimeout {
                    hash: hash.to_string(),
                    secs: self.confirmation_timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.confirmation_poll).await;
        }
    }
}
