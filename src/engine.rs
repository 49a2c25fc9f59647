//! Vault engine facade
//!
//! Owns the registry, the ledger and both periodic loops, and exposes the
//! application-facing operations. Everything shares one rate limiter and
//! retry policy through the gateway. Loops run per active signer: setting
//! a signer starts them, clearing it or shutting down stops them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::abi::{self, selectors, Token};
use crate::chain::{EvmChain, Signer, TransactionRequest, TxReceipt, VaultChain, VaultGateway};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::rpc::{NodeClient, RateLimiter, ResilientCaller, RetryPolicy};
use crate::types::{format_ether, Address};
use crate::vault::{Reconciler, SnapshotOutcome, SnapshotReader, Vault, VaultRegistry};
use crate::withdraw::{
    AutoWithdrawCoordinator, WithdrawalExecutor, WithdrawalLedger, WithdrawalReceipt,
};

/// Arguments of `createVault`; a zero target price and goal make a time vault
#[derive(Debug, Clone, Default)]
pub struct CreateVaultParams {
    /// Epoch seconds
    pub unlock_time: u64,
    /// Oracle price scaled by 1e8, zero when not price-locked
    pub target_price: u128,
    /// Wei, zero when not goal-locked
    pub goal_amount: u128,
    /// Wei sent along with the creation
    pub initial_deposit: u128,
}

impl CreateVaultParams {
    pub fn validate(&self) -> Result<()> {
        if self.target_price > 0 && self.goal_amount > 0 {
            return Err(Error::InvalidArgument(
                "a vault is either price-locked or goal-locked, not both".into(),
            ));
        }
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        if self.target_price == 0 && self.goal_amount == 0 && self.unlock_time <= now {
            return Err(Error::InvalidArgument(format!(
                "unlock time {} is not in the future",
                self.unlock_time
            )));
        }
        Ok(())
    }
}

/// Loops of one active account
struct Session {
    account: Address,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct VaultEngine {
    config: Config,
    gateway: Arc<VaultGateway>,
    reader: Arc<SnapshotReader>,
    registry: Arc<VaultRegistry>,
    ledger: Arc<WithdrawalLedger>,
    executor: Arc<WithdrawalExecutor>,
    reconciler: Arc<Reconciler>,
    coordinator: Arc<AutoWithdrawCoordinator>,
    events: EventBus,
    nudge: Arc<Notify>,
    session: Mutex<Option<Session>>,
}

impl VaultEngine {
    pub fn new(config: Config, chain: Arc<dyn VaultChain>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let caller = Arc::new(ResilientCaller::new(
            limiter,
            RetryPolicy::from(&config.retry),
        ));
        let gateway = Arc::new(VaultGateway::new(chain, caller, &config.withdrawal));
        let reader = Arc::new(SnapshotReader::new(gateway.clone()));
        let registry = Arc::new(VaultRegistry::new());
        let ledger = Arc::new(WithdrawalLedger::new());
        let events = EventBus::new(config.engine.event_capacity);
        let executor = Arc::new(WithdrawalExecutor::new(
            gateway.clone(),
            config.chain.chain_id,
            &config.withdrawal,
        ));
        let reconciler = Arc::new(Reconciler::new(
            gateway.clone(),
            reader.clone(),
            registry.clone(),
            events.clone(),
        ));
        let coordinator = Arc::new(AutoWithdrawCoordinator::new(
            gateway.clone(),
            reader.clone(),
            registry.clone(),
            ledger.clone(),
            executor.clone(),
            events.clone(),
            &config.engine,
        ));

        Self {
            config,
            gateway,
            reader,
            registry,
            ledger,
            executor,
            reconciler,
            coordinator,
            events,
            nudge: Arc::new(Notify::new()),
            session: Mutex::new(None),
        }
    }

    /// Engine over the configured JSON-RPC node
    pub fn connect(config: Config) -> Result<Self> {
        let node = Arc::new(NodeClient::new(
            config.rpc.endpoint.clone(),
            Duration::from_millis(config.rpc.timeout_ms),
        )?);
        let chain = Arc::new(EvmChain::new(node, &config.chain));
        Ok(Self::new(config, chain))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<VaultGateway> {
        &self.gateway
    }

    pub fn ledger(&self) -> &Arc<WithdrawalLedger> {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn active_account(&self) -> Option<Address> {
        self.session.lock().await.as_ref().map(|s| s.account)
    }

    // === Signer lifecycle ===

    /// Make `signer` the active account and (re)start the loops
    pub async fn set_signer(&self, signer: Arc<dyn Signer>) -> Result<()> {
        let account = signer.address();
        let mut session = self.session.lock().await;

        if let Some(previous) = session.take() {
            let switched = previous.account != account;
            stop(previous).await;
            if switched {
                self.registry.clear().await;
            }
        }
        self.gateway.set_signer(signer)?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let reconciler = self.reconciler.clone();
        let nudge = self.nudge.clone();
        let period = Duration::from_secs(self.config.engine.refresh_interval_secs);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            reconciler.run(account, period, nudge, token).await;
        }));

        if self.config.engine.auto_withdraw {
            let coordinator = self.coordinator.clone();
            let period = Duration::from_secs(self.config.engine.auto_withdraw_interval_secs);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.run(period, token).await;
            }));
        } else {
            warn!("Auto-withdraw disabled, only refreshing vaults");
        }

        *session = Some(Session {
            account,
            cancel,
            tasks,
        });
        Ok(())
    }

    /// Use `signer` for one-off operations without starting the loops
    pub fn attach_signer(&self, signer: Arc<dyn Signer>) -> Result<()> {
        self.gateway.set_signer(signer)
    }

    /// Stop the loops, drop the signer and forget the account's vaults
    pub async fn clear_signer(&self) -> Result<()> {
        if let Some(previous) = self.session.lock().await.take() {
            stop(previous).await;
        }
        self.gateway.clear_signer()?;
        self.registry.clear().await;
        Ok(())
    }

    /// Stop the loops; in-flight calls finish on their own
    pub async fn shutdown(&self) {
        if let Some(previous) = self.session.lock().await.take() {
            stop(previous).await;
        }
        info!(
            "Engine stopped ({} withdrawals this session)",
            self.ledger.len()
        );
    }

    // === Application operations ===

    /// Current registry contents, in factory order
    pub async fn list_vaults(&self) -> Vec<Vault> {
        self.registry.list().await
    }

    /// One-off read of every vault of `account`, bypassing the registry
    pub async fn scan(&self, account: Address) -> Result<Vec<SnapshotOutcome>> {
        self.reconciler.scan(account, &[]).await
    }

    /// Fresh snapshot of one vault
    pub async fn snapshot(&self, vault: Address) -> Result<Vault> {
        self.reader.fetch(vault).await
    }

    pub async fn create_vault(&self, params: CreateVaultParams) -> Result<TxReceipt> {
        params.validate()?;
        let from = self.gateway.signer()?.address();
        let factory = self.gateway.factory()?;

        let data = abi::encode_call(
            selectors::CREATE_VAULT,
            &[
                Token::Uint(params.unlock_time as u128),
                Token::Uint(params.target_price),
                Token::Uint(params.goal_amount),
            ],
        );
        let tx = TransactionRequest::call(from, factory, data).with_value(params.initial_deposit);

        info!(
            "Creating vault via {} with {} ETH",
            factory,
            format_ether(params.initial_deposit)
        );
        let receipt = self.executor.send(tx).await?;
        self.nudge.notify_one();
        Ok(receipt)
    }

    pub async fn deposit(&self, vault: Address, amount: u128) -> Result<TxReceipt> {
        if amount == 0 {
            return Err(Error::InvalidArgument("deposit amount must be positive".into()));
        }
        let from = self.gateway.signer()?.address();
        let tx = TransactionRequest::call(from, vault, abi::encode_call(selectors::DEPOSIT, &[]))
            .with_value(amount);

        info!("Depositing {} ETH into {}", format_ether(amount), vault);
        let receipt = self.executor.send(tx).await?;
        self.nudge.notify_one();
        Ok(receipt)
    }

    /// Manual withdrawal with the failure cause preserved
    pub async fn try_withdraw(&self, vault: Address) -> Result<WithdrawalReceipt> {
        match self.executor.withdraw(vault).await {
            Ok(result) => {
                self.events.emit(EngineEvent::WithdrawSucceeded {
                    vault,
                    tx_hash: result.receipt.tx_hash,
                    amount: result.amount,
                    automatic: false,
                });
                self.nudge.notify_one();
                Ok(result)
            }
            Err(e) => {
                error!("Withdrawal from {} failed: {}", vault, e);
                self.events.emit(EngineEvent::WithdrawFailed {
                    vault,
                    error: e.to_string(),
                    kind: e.kind(),
                    automatic: false,
                });
                Err(e)
            }
        }
    }

    /// Manual withdrawal; the cause is published as an event and logged
    pub async fn withdraw(&self, vault: Address) -> bool {
        self.try_withdraw(vault).await.is_ok()
    }
}

async fn stop(session: Session) {
    session.cancel.cancel();
    for task in session.tasks {
        if let Err(e) = task.await {
            error!("Engine loop for {} ended abnormally: {}", session.account, e);
        }
    }
}
