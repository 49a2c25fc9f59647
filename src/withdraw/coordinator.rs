//! Auto-withdrawal coordinator
//!
//! Runs on its own interval, independent of the registry refresh. Each tick
//! filters the cached registry, re-reads every plausible candidate fresh
//! from the chain and only then hands it to the executor. The ledger is
//! written only here, right after a confirmed withdrawal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::VaultGateway;
use crate::config::EngineConfig;
use crate::error::ErrorKind;
use crate::events::{EngineEvent, EventBus};
use crate::vault::{SnapshotOutcome, SnapshotReader, VaultRegistry};
use crate::withdraw::executor::WithdrawalExecutor;
use crate::withdraw::ledger::WithdrawalLedger;

/// Counters for one coordinator tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct AutoWithdrawCoordinator {
    gateway: Arc<VaultGateway>,
    reader: Arc<SnapshotReader>,
    registry: Arc<VaultRegistry>,
    ledger: Arc<WithdrawalLedger>,
    executor: Arc<WithdrawalExecutor>,
    events: EventBus,
    cooldown: Duration,
    max_attempts: Option<u32>,
}

impl AutoWithdrawCoordinator {
    pub fn new(
        gateway: Arc<VaultGateway>,
        reader: Arc<SnapshotReader>,
        registry: Arc<VaultRegistry>,
        ledger: Arc<WithdrawalLedger>,
        executor: Arc<WithdrawalExecutor>,
        events: EventBus,
        config: &EngineConfig,
    ) -> Self {
        Self {
            gateway,
            reader,
            registry,
            ledger,
            executor,
            events,
            cooldown: Duration::from_secs(config.failure_cooldown_secs),
            max_attempts: config.max_auto_attempts,
        }
    }

    /// Tick every `period` until cancelled; the first tick fires immediately
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        info!("Auto-withdraw loop started ({}s interval)", period.as_secs());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick(&cancel).await;
                    if report.attempted > 0 {
                        info!(
                            "Auto-withdraw tick: {} examined, {} succeeded, {} failed",
                            report.examined, report.succeeded, report.failed
                        );
                    }
                }
            }
        }

        info!("Auto-withdraw loop stopped");
    }

    /// One pass over the registry in iteration order
    pub async fn tick(&self, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        if !self.gateway.has_signer() {
            debug!("No active signer, skipping auto-withdraw tick");
            return report;
        }

        for cached in self.registry.list().await {
            if cancel.is_cancelled() {
                break;
            }
            let address = cached.address;

            if self.ledger.contains(&address) || cached.balance == 0 {
                continue;
            }
            if let Some(max) = self.max_attempts {
                if self.ledger.failures(&address) >= max {
                    debug!("{} reached {} failed attempts, not retrying", address, max);
                    continue;
                }
            }
            report.examined += 1;

            // Never act on the cached view
            let fresh = match self.reader.read(address, Some(cached.lock_kind)).await {
                SnapshotOutcome::Fresh(vault) => vault,
                other => {
                    debug!("Fresh read of {} unusable this tick: {:?}", address, other);
                    continue;
                }
            };
            if !fresh.is_withdrawable() {
                continue;
            }

            report.attempted += 1;
            info!("Vault {} unlocked, starting auto-withdrawal", address);
            self.events
                .emit(EngineEvent::AutoWithdrawStarted { vault: address });

            match self.executor.withdraw(address).await {
                Ok(result) => {
                    report.succeeded += 1;
                    self.ledger.record_success(address);
                    self.registry.remove(&address).await;
                    info!(
                        "Auto-withdrawal of {} succeeded: {}",
                        address, result.receipt.tx_hash
                    );
                    self.events.emit(EngineEvent::WithdrawSucceeded {
                        vault: address,
                        tx_hash: result.receipt.tx_hash,
                        amount: result.amount,
                        automatic: true,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    let attempts = self.ledger.record_failure(address);
                    error!(
                        "Auto-withdrawal of {} failed (attempt {}): {}",
                        address, attempts, e
                    );
                    self.events.emit(EngineEvent::WithdrawFailed {
                        vault: address,
                        error: e.to_string(),
                        kind: e.kind(),
                        automatic: true,
                    });

                    if e.kind() == ErrorKind::SignerUnavailable {
                        warn!("Signer went away, halting auto-withdraw until one is set");
                        break;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.cooldown) => {}
                    }
                }
            }
        }

        report
    }
}
