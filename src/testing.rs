//! In-memory chain and signer for engine tests
//!
//! `MockChain` models the factory, the vaults and the oracle closely enough
//! for lock transitions: a goal vault unlocks when a deposit reaches its
//! goal, a withdrawal empties the vault. Failures can be injected per vault
//! to exercise the snapshot classification paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::chain::abi::{selectors, AbiReader};
use crate::chain::{
    FeeParams, LockStatus, OracleRound, Signer, TransactionRequest, TxReceipt, VaultChain,
    VaultGateway,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::rpc::{RateLimiter, ResilientCaller, RetryPolicy};
use crate::types::{Address, TxHash};
use crate::vault::{Reconciler, SnapshotReader, VaultRegistry};
use crate::withdraw::{AutoWithdrawCoordinator, WithdrawalExecutor, WithdrawalLedger};

pub const TEST_CHAIN_ID: u64 = 11_155_111;
pub const GAS_ESTIMATE: u64 = 50_000;
const BASE_FEE: u128 = 10_000_000_000;
const PRIORITY_FEE: u128 = 1_500_000_000;

#[derive(Debug, Clone)]
pub struct MockVault {
    pub balance: u128,
    pub unlock_time: u64,
    pub creator: Address,
    pub target_price: u128,
    pub status: LockStatus,
}

#[derive(Default)]
struct MockState {
    chain_id: u64,
    next_vault: u8,
    next_tx: u64,
    listed: Vec<Address>,
    vaults: HashMap<Address, MockVault>,
    vault_failures: HashMap<Address, (Error, u32)>,
    list_failures: Option<(Error, u32)>,
    submit_failures: Option<(Error, u32)>,
    withdraw_leaves_balance: bool,
    post_withdraw_failure: Option<(Error, u32)>,
    receipts: HashMap<TxHash, TxReceipt>,
    submissions: Vec<TransactionRequest>,
    calls: HashMap<&'static str, u32>,
}

/// Shared in-memory chain
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                chain_id: TEST_CHAIN_ID,
                next_vault: 0x10,
                ..Default::default()
            }),
        })
    }

    /// Deterministic address filled with `byte`
    pub fn address(byte: u8) -> Address {
        Address([byte; 20])
    }

    pub fn account() -> Address {
        Self::address(0xaa)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn insert(&self, vault: MockVault) -> Address {
        let mut state = self.state();
        let address = Self::address(state.next_vault);
        state.next_vault += 1;
        state.listed.push(address);
        state.vaults.insert(address, vault);
        address
    }

    fn status(is_locked: bool, reason: &str) -> LockStatus {
        LockStatus {
            is_locked,
            current_price: 0,
            time_remaining: 0,
            is_price_based: false,
            is_goal_based: false,
            current_amount: 0,
            goal_amount: 0,
            progress_percentage: 0,
            unlock_reason: reason.to_string(),
        }
    }

    /// Time vault; `time_remaining == 0` means already unlocked
    pub fn add_time_vault(&self, balance: u128, time_remaining: u64) -> Address {
        let mut status = Self::status(time_remaining > 0, "Time lock");
        status.time_remaining = time_remaining;
        self.insert(MockVault {
            balance,
            unlock_time: 1_900_000_000 + time_remaining,
            creator: Self::account(),
            target_price: 0,
            status,
        })
    }

    /// Goal vault holding `current` towards `goal`
    pub fn add_goal_vault(&self, current: u128, goal: u128) -> Address {
        let mut status = Self::status(current < goal, "Goal not reached");
        status.is_goal_based = true;
        status.current_amount = current;
        status.goal_amount = goal;
        self.insert(MockVault {
            balance: current,
            unlock_time: 0,
            creator: Self::account(),
            target_price: 0,
            status,
        })
    }

    /// Price vault; locked while `current_price < target_price`
    pub fn add_price_vault(&self, balance: u128, target_price: u128, current_price: u128) -> Address {
        let mut status = Self::status(current_price < target_price, "Price below target");
        status.is_price_based = true;
        status.current_price = current_price;
        self.insert(MockVault {
            balance,
            unlock_time: 0,
            creator: Self::account(),
            target_price,
            status,
        })
    }

    /// List an address the factory knows but that holds no vault code
    pub fn list_bogus(&self, address: Address) {
        self.state().listed.push(address);
    }

    pub fn unlist(&self, address: Address) {
        self.state().listed.retain(|a| *a != address);
    }

    pub fn vault(&self, address: Address) -> Option<MockVault> {
        self.state().vaults.get(&address).cloned()
    }

    pub fn set_locked(&self, address: Address, is_locked: bool) {
        if let Some(v) = self.state().vaults.get_mut(&address) {
            v.status.is_locked = is_locked;
            if !is_locked {
                v.status.time_remaining = 0;
            }
        }
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state().chain_id = chain_id;
    }

    /// Next `times` vault-scoped reads of `address` fail with `error`
    pub fn fail_vault(&self, address: Address, error: Error, times: u32) {
        self.state().vault_failures.insert(address, (error, times));
    }

    /// Drop any injected failures for `address`
    pub fn heal(&self, address: Address) {
        self.state().vault_failures.remove(&address);
    }

    pub fn fail_list(&self, error: Error, times: u32) {
        self.state().list_failures = Some((error, times));
    }

    pub fn fail_submissions(&self, error: Error, times: u32) {
        self.state().submit_failures = Some((error, times));
    }

    /// Withdrawals confirm but leave the balance in place
    pub fn withdraw_leaves_balance(&self) {
        self.state().withdraw_leaves_balance = true;
    }

    /// After each confirmed withdrawal, the next `times` reads of that vault fail
    pub fn fail_reads_after_withdraw(&self, error: Error, times: u32) {
        self.state().post_withdraw_failure = Some((error, times));
    }

    pub fn submissions(&self) -> Vec<TransactionRequest> {
        self.state().submissions.clone()
    }

    /// Submitted transactions calling `selector`
    pub fn submitted(&self, selector: [u8; 4]) -> usize {
        self.state()
            .submissions
            .iter()
            .filter(|tx| tx.data.starts_with(&selector))
            .count()
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    fn take_failure(slot: &mut Option<(Error, u32)>) -> Option<Error> {
        let (error, remaining) = slot.as_mut()?;
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            *slot = None;
        }
        Some(error)
    }

    /// Count the call and resolve the vault, honoring injected failures
    fn read_vault(&self, method: &'static str, address: Address) -> Result<MockVault> {
        let mut state = self.state();
        *state.calls.entry(method).or_default() += 1;

        let mut slot = state.vault_failures.remove(&address);
        let failure = Self::take_failure(&mut slot);
        if let Some(rest) = slot {
            state.vault_failures.insert(address, rest);
        }
        if let Some(error) = failure {
            return Err(error);
        }

        state
            .vaults
            .get(&address)
            .cloned()
            .ok_or(Error::CallException { data: None })
    }

    fn count(&self, method: &'static str) {
        *self.state().calls.entry(method).or_default() += 1;
    }

    /// Apply a signed transaction and mine it immediately
    fn apply(&self, tx: &TransactionRequest) -> Result<TxHash> {
        let mut state = self.state();
        if let Some(error) = Self::take_failure(&mut state.submit_failures) {
            return Err(error);
        }

        let selector: [u8; 4] = tx
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| Error::InvalidArgument("missing selector".into()))?;

        let mut created = None;
        if selector == selectors::WITHDRAW {
            let leaves_balance = state.withdraw_leaves_balance;
            let vault = state
                .vaults
                .get_mut(&tx.to)
                .ok_or(Error::CallException { data: None })?;
            if vault.status.is_locked {
                return Err(Error::ContractReverted {
                    message: "execution reverted: Vault is locked".into(),
                    data: None,
                });
            }
            if !leaves_balance {
                vault.balance = 0;
                vault.status.current_amount = 0;
            }
            if let Some(failure) = state.post_withdraw_failure.clone() {
                state.vault_failures.insert(tx.to, failure);
            }
        } else if selector == selectors::DEPOSIT {
            let vault = state
                .vaults
                .get_mut(&tx.to)
                .ok_or(Error::CallException { data: None })?;
            vault.balance += tx.value;
            if vault.status.is_goal_based {
                vault.status.current_amount += tx.value;
                if vault.status.current_amount >= vault.status.goal_amount {
                    vault.status.is_locked = false;
                }
            }
        } else if selector == selectors::CREATE_VAULT {
            let args = AbiReader::new(&tx.data[4..])?;
            let unlock_time = args.uint64(0)?;
            let address = Self::address(state.next_vault);
            state.next_vault += 1;
            state.listed.push(address);
            state.vaults.insert(
                address,
                MockVault {
                    balance: tx.value,
                    unlock_time,
                    creator: tx.from,
                    target_price: args.uint(1)?,
                    status: Self::status(true, "Time lock"),
                },
            );
            created = Some(address);
        }

        state.next_tx += 1;
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        let hash = TxHash(hash);

        state.submissions.push(tx.clone());
        let block_number = 1_000 + state.next_tx;
        state.receipts.insert(
            hash,
            TxReceipt {
                tx_hash: hash,
                block_number,
                gas_used: GAS_ESTIMATE,
                success: true,
                contract_address: created,
            },
        );
        Ok(hash)
    }
}

#[async_trait]
impl VaultChain for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        self.count("chain_id");
        Ok(self.state().chain_id)
    }

    async fn user_vaults(&self, _account: Address) -> Result<Vec<Address>> {
        let mut state = self.state();
        *state.calls.entry("user_vaults").or_default() += 1;
        if let Some(error) = Self::take_failure(&mut state.list_failures) {
            return Err(error);
        }
        Ok(state.listed.clone())
    }

    async fn vault_balance(&self, vault: Address) -> Result<u128> {
        Ok(self.read_vault("vault_balance", vault)?.balance)
    }

    async fn unlock_time(&self, vault: Address) -> Result<u64> {
        Ok(self.read_vault("unlock_time", vault)?.unlock_time)
    }

    async fn creator(&self, vault: Address) -> Result<Address> {
        Ok(self.read_vault("creator", vault)?.creator)
    }

    async fn target_price(&self, vault: Address) -> Result<u128> {
        Ok(self.read_vault("target_price", vault)?.target_price)
    }

    async fn lock_status(&self, vault: Address) -> Result<LockStatus> {
        Ok(self.read_vault("lock_status", vault)?.status)
    }

    async fn latest_price(&self) -> Result<OracleRound> {
        self.count("latest_price");
        Ok(OracleRound {
            round_id: 1,
            price: 2_000_00000000,
            started_at: 1_900_000_000,
            updated_at: 1_900_000_000,
            answered_in_round: 1,
        })
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
        self.count("estimate_gas");
        Ok(GAS_ESTIMATE)
    }

    async fn fee_params(&self) -> Result<FeeParams> {
        self.count("fee_params");
        Ok(FeeParams::Eip1559 {
            max_fee_per_gas: 2 * BASE_FEE + PRIORITY_FEE,
            max_priority_fee_per_gas: PRIORITY_FEE,
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        self.count("transaction_receipt");
        Ok(self.state().receipts.get(&hash).cloned())
    }

    fn factory(&self) -> Result<Address> {
        Ok(Self::address(0xfa))
    }
}

/// Signer that applies transactions straight to a `MockChain`
pub struct MockSigner {
    chain: Arc<MockChain>,
    account: Address,
}

impl MockSigner {
    pub fn new(chain: Arc<MockChain>, account: Address) -> Arc<Self> {
        Arc::new(Self { chain, account })
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn address(&self) -> Address {
        self.account
    }

    async fn sign_and_submit(&self, tx: TransactionRequest) -> Result<TxHash> {
        self.chain.apply(&tx)
    }
}

/// Config with fast confirmation polling and the mock's chain id
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chain.chain_id = TEST_CHAIN_ID;
    config.withdrawal.confirmation_poll_ms = 10;
    config.withdrawal.confirmation_timeout_secs = 5;
    config
}

/// Engine components wired against a `MockChain`, signed in as `MockChain::account()`
pub struct TestHarness {
    pub chain: Arc<MockChain>,
    pub account: Address,
    pub gateway: Arc<VaultGateway>,
    pub reader: Arc<SnapshotReader>,
    pub registry: Arc<VaultRegistry>,
    pub ledger: Arc<WithdrawalLedger>,
    pub executor: Arc<WithdrawalExecutor>,
    pub events: EventBus,
    pub reconciler: Reconciler,
    pub coordinator: AutoWithdrawCoordinator,
}

impl TestHarness {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self::with_config(chain, test_config())
    }

    pub fn with_config(chain: Arc<MockChain>, config: Config) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let caller = Arc::new(ResilientCaller::new(
            limiter,
            RetryPolicy::from(&config.retry),
        ));
        let gateway = Arc::new(VaultGateway::new(
            chain.clone(),
            caller,
            &config.withdrawal,
        ));
        let account = MockChain::account();
        gateway
            .set_signer(MockSigner::new(chain.clone(), account))
            .unwrap();

        let reader = Arc::new(SnapshotReader::new(gateway.clone()));
        let registry = Arc::new(VaultRegistry::new());
        let ledger = Arc::new(WithdrawalLedger::new());
        let events = EventBus::new(config.engine.event_capacity);
        let executor = Arc::new(WithdrawalExecutor::new(
            gateway.clone(),
            config.chain.chain_id,
            &config.withdrawal,
        ));
        let reconciler = Reconciler::new(
            gateway.clone(),
            reader.clone(),
            registry.clone(),
            events.clone(),
        );
        let coordinator = AutoWithdrawCoordinator::new(
            gateway.clone(),
            reader.clone(),
            registry.clone(),
            ledger.clone(),
            executor.clone(),
            events.clone(),
            &config.engine,
        );

        Self {
            chain,
            account,
            gateway,
            reader,
            registry,
            ledger,
            executor,
            events,
            reconciler,
            coordinator,
        }
    }
}
