//! Engine events for notification layers
//!
//! Success and failure of withdrawals are published here as typed events;
//! subscribers never need to inspect log output.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ErrorKind;
use crate::types::{Address, TxHash};

/// Something a UI or notifier may want to react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Registry replaced or merged after a reconciliation pass
    RegistryRefreshed { vaults: usize },
    /// Vault dropped because its address is not a compatible vault
    VaultRetired { vault: Address, reason: String },
    /// Coordinator is about to submit a withdrawal
    AutoWithdrawStarted { vault: Address },
    WithdrawSucceeded {
        vault: Address,
        tx_hash: TxHash,
        amount: u128,
        automatic: bool,
    },
    WithdrawFailed {
        vault: Address,
        error: String,
        kind: ErrorKind,
        automatic: bool,
    },
}

/// Broadcast fan-out of engine events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish; having no subscribers is fine
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
