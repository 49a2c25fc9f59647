//! Chain collaborators consumed by the engine
//!
//! `VaultChain` is the read/write surface of the factory, vault and oracle
//! contracts; `Signer` is the opaque sign-and-submit capability. Neither is
//! called directly by engine components: everything goes through
//! [`gateway::VaultGateway`], which applies the shared rate limit and retry
//! policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Address, TxHash};

pub mod abi;
pub mod evm;
pub mod gateway;
pub mod signer;

pub use evm::EvmChain;
pub use gateway::VaultGateway;
pub use signer::NodeSigner;

/// Aggregated lock-status tuple returned by a vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub is_locked: bool,
    /// Oracle price seen by the contract, scaled by 1e8
    pub current_price: u128,
    pub time_remaining: u64,
    pub is_price_based: bool,
    pub is_goal_based: bool,
    pub current_amount: u128,
    pub goal_amount: u128,
    /// Contract-computed progress; informational, recomputed locally
    pub progress_percentage: u128,
    pub unlock_reason: String,
}

/// `latestRoundData()` of a Chainlink-style aggregator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OracleRound {
    pub round_id: u128,
    /// Price scaled by 1e8
    pub price: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u128,
}

/// Fee parameters for a submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeeParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Unsigned transaction handed to the signer
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_limit: Option<u64>,
    pub fees: Option<FeeParams>,
}

impl TransactionRequest {
    pub fn call(from: Address, to: Address, data: Vec<u8>) -> Self {
        Self {
            from,
            to,
            data,
            value: 0,
            gas_limit: None,
            fees: None,
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
    /// Address of a contract created by the transaction, if any
    pub contract_address: Option<Address>,
}

/// Read/write surface of the vault system on one chain
#[async_trait]
pub trait VaultChain: Send + Sync {
    /// Chain id of the connected network
    async fn chain_id(&self) -> Result<u64>;

    /// Vault addresses registered for `account` in the factory
    async fn user_vaults(&self, account: Address) -> Result<Vec<Address>>;

    /// Wei held by the vault
    async fn vault_balance(&self, vault: Address) -> Result<u128>;

    async fn unlock_time(&self, vault: Address) -> Result<u64>;

    async fn creator(&self, vault: Address) -> Result<Address>;

    async fn target_price(&self, vault: Address) -> Result<u128>;

    async fn lock_status(&self, vault: Address) -> Result<LockStatus>;

    async fn latest_price(&self) -> Result<OracleRound>;

    /// Gas units `tx` would consume
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    async fn fee_params(&self) -> Result<FeeParams>;

    /// Receipt for `hash`, `None` while pending
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>>;

    /// Factory contract used for discovery and creation
    fn factory(&self) -> Result<Address>;
}

/// Sign-and-submit capability of the active account
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_and_submit(&self, tx: TransactionRequest) -> Result<TxHash>;
}
