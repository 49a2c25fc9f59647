//! Vault registry and reconciliation loop
//!
//! The registry is the in-memory view of the active account's vaults. It is
//! rebuilt from chain state on every reconciliation pass with a
//! staleness-tolerant merge:
//! - an empty address list empties the registry;
//! - with at least one fresh snapshot the registry is replaced by the fresh
//!   vaults holding a balance, plus placeholders for vaults whose reads
//!   failed transiently;
//! - with no fresh snapshot the previous view is kept, minus any vault the
//!   chain just proved is not a vault.
//!
//! A vault withdrawn while a pass was reading is left out of that pass's
//! result, since its snapshot predates the withdrawal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::VaultGateway;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::types::Address;
use crate::vault::snapshot::SnapshotReader;
use crate::vault::types::{SnapshotOutcome, Vault};

/// Vaults of the active account, in factory order
#[derive(Default)]
pub struct VaultRegistry {
    inner: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    vaults: Vec<Vault>,
    /// Bumped on every removal
    removals: u64,
    /// Addresses removed since the last replace, with their removal number
    removed: Vec<(u64, Address)>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Vault> {
        self.inner.read().await.vaults.clone()
    }

    pub async fn get(&self, address: &Address) -> Option<Vault> {
        self.inner
            .read()
            .await
            .vaults
            .iter()
            .find(|v| v.address == *address)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.vaults.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.vaults.is_empty()
    }

    /// Current contents plus a mark for [`replace_since`](Self::replace_since)
    pub(crate) async fn begin_pass(&self) -> (Vec<Vault>, u64) {
        let inner = self.inner.read().await;
        (inner.vaults.clone(), inner.removals)
    }

    /// Replace with a pass that began at `mark`, skipping vaults removed
    /// after it: their snapshots predate the removal
    pub(crate) async fn replace_since(&self, mark: u64, vaults: Vec<Vault>) -> usize {
        let mut inner = self.inner.write().await;
        let stale: HashSet<Address> = inner
            .removed
            .iter()
            .filter(|(n, _)| *n > mark)
            .map(|(_, a)| *a)
            .collect();
        inner.vaults = vaults
            .into_iter()
            .filter(|v| !stale.contains(&v.address))
            .collect();
        inner.removed.clear();
        inner.vaults.len()
    }

    pub(crate) async fn remove(&self, address: &Address) -> Option<Vault> {
        let mut inner = self.inner.write().await;
        inner.removals += 1;
        let n = inner.removals;
        inner.removed.push((n, *address));
        let idx = inner.vaults.iter().position(|v| v.address == *address)?;
        Some(inner.vaults.remove(idx))
    }

    pub(crate) async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.vaults.clear();
        inner.removed.clear();
    }
}

/// How a reconciliation pass changed the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Address list empty, or every address retired
    Cleared,
    /// Rebuilt from this pass
    Replaced,
    /// Every read failed transiently; previous view kept
    Kept,
}

/// Counters for one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub listed: usize,
    pub fresh: usize,
    pub pending: usize,
    pub retired: usize,
    pub decision: MergeDecision,
    pub vaults: usize,
}

/// Apply the merge rule to the current registry contents
pub fn merge(current: &[Vault], outcomes: &[SnapshotOutcome]) -> (MergeDecision, Vec<Vault>) {
    let fresh = outcomes
        .iter()
        .filter(|o| matches!(o, SnapshotOutcome::Fresh(_)))
        .count();
    let pending = outcomes
        .iter()
        .filter(|o| matches!(o, SnapshotOutcome::Pending { .. }))
        .count();

    if outcomes.is_empty() || (fresh == 0 && pending == 0) {
        return (MergeDecision::Cleared, Vec::new());
    }

    if fresh == 0 {
        let retired: HashSet<Address> = outcomes
            .iter()
            .filter(|o| matches!(o, SnapshotOutcome::Retired { .. }))
            .map(SnapshotOutcome::address)
            .collect();
        let kept = current
            .iter()
            .filter(|v| !retired.contains(&v.address))
            .cloned()
            .collect();
        return (MergeDecision::Kept, kept);
    }

    let vaults = outcomes
        .iter()
        .filter_map(|o| match o {
            SnapshotOutcome::Fresh(v) if v.balance > 0 => Some(v.clone()),
            SnapshotOutcome::Pending { vault, .. } => Some(vault.clone()),
            _ => None,
        })
        .collect();
    (MergeDecision::Replaced, vaults)
}

/// Periodically rebuilds the registry from chain state
pub struct Reconciler {
    gateway: Arc<VaultGateway>,
    reader: Arc<SnapshotReader>,
    registry: Arc<VaultRegistry>,
    events: EventBus,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<VaultGateway>,
        reader: Arc<SnapshotReader>,
        registry: Arc<VaultRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            reader,
            registry,
            events,
        }
    }

    /// Snapshot every vault of `account` without touching the registry
    pub async fn scan(&self, account: Address, current: &[Vault]) -> Result<Vec<SnapshotOutcome>> {
        let addresses = self.gateway.user_vaults(account).await?;
        debug!("Factory lists {} vaults for {}", addresses.len(), account);

        let reads = addresses.into_iter().map(|address| {
            let known_kind = current
                .iter()
                .find(|v| v.address == address)
                .map(|v| v.lock_kind);
            self.reader.read(address, known_kind)
        });
        Ok(join_all(reads).await)
    }

    /// One reconciliation pass; a failed address-list read leaves the registry alone
    pub async fn reconcile(&self, account: Address) -> Result<ReconcileReport> {
        let (current, mark) = self.registry.begin_pass().await;
        let outcomes = self.scan(account, &current).await?;

        let (decision, vaults) = merge(&current, &outcomes);
        let merged = vaults.len();
        let kept = self.registry.replace_since(mark, vaults).await;
        if kept < merged {
            debug!("Skipped {} vaults withdrawn during this pass", merged - kept);
        }

        let report = ReconcileReport {
            listed: outcomes.len(),
            fresh: outcomes
                .iter()
                .filter(|o| matches!(o, SnapshotOutcome::Fresh(_)))
                .count(),
            pending: outcomes
                .iter()
                .filter(|o| matches!(o, SnapshotOutcome::Pending { .. }))
                .count(),
            retired: outcomes
                .iter()
                .filter(|o| matches!(o, SnapshotOutcome::Retired { .. }))
                .count(),
            decision,
            vaults: kept,
        };

        for outcome in &outcomes {
            if let SnapshotOutcome::Retired { address, reason } = outcome {
                self.events.emit(EngineEvent::VaultRetired {
                    vault: *address,
                    reason: reason.clone(),
                });
            }
        }
        self.events.emit(EngineEvent::RegistryRefreshed {
            vaults: report.vaults,
        });

        if report.pending > 0 {
            info!(
                "Registry refreshed: {} vaults ({} pending, {:?})",
                report.vaults, report.pending, report.decision
            );
        } else {
            debug!("Registry refreshed: {} vaults ({:?})", report.vaults, report.decision);
        }
        Ok(report)
    }

    /// Reconcile every `period` or when nudged, until cancelled
    pub async fn run(
        &self,
        account: Address,
        period: Duration,
        nudge: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        info!("Registry loop started for {} ({}s interval)", account, period.as_secs());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = nudge.notified() => debug!("Registry refresh requested"),
            }

            if let Err(e) = self.reconcile(account).await {
                warn!("Registry refresh failed, keeping previous view: {}", e);
            }
        }

        info!("Registry loop stopped for {}", account);
    }
}
