//! Vault data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::LockStatus;
use crate::types::{format_duration, format_ether, Address};

/// Unlock condition, fixed when the vault is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    #[default]
    Time,
    Price,
    Goal,
}

impl LockKind {
    /// Price wins over goal; anything else is time-locked
    pub fn from_flags(is_price_based: bool, is_goal_based: bool) -> Self {
        if is_price_based {
            LockKind::Price
        } else if is_goal_based {
            LockKind::Goal
        } else {
            LockKind::Time
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Time => write!(f, "time"),
            LockKind::Price => write!(f, "price"),
            LockKind::Goal => write!(f, "goal"),
        }
    }
}

/// Unlock reason shown while a vault's snapshot could not be read
pub const PENDING_REASON: &str = "pending";

/// Local view of one vault contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    /// Wei held by the vault
    pub balance: u128,
    pub lock_kind: LockKind,
    /// Epoch seconds; binding only for time vaults
    pub unlock_time: u64,
    /// Oracle price target scaled by 1e8 (price vaults)
    pub target_price: u128,
    pub goal_amount: u128,
    pub current_amount: u128,
    pub progress_percentage: f64,
    /// Price the contract compared against, scaled by 1e8
    pub current_price: u128,
    /// Latest oracle answer, scaled by 1e8
    pub oracle_price: i128,
    pub time_remaining: u64,
    pub creator: Address,
    /// Authoritative only as of `last_snapshot_at`
    pub is_locked: bool,
    /// Chain-supplied explanation; display only
    pub unlock_reason: String,
    /// Set when the snapshot read succeeded
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

impl Vault {
    /// Build from the individual reads of one snapshot
    pub fn from_reads(
        address: Address,
        balance: u128,
        unlock_time: u64,
        creator: Address,
        target_price: u128,
        status: LockStatus,
        oracle_price: i128,
    ) -> Self {
        Self {
            address,
            balance,
            lock_kind: LockKind::from_flags(status.is_price_based, status.is_goal_based),
            unlock_time,
            target_price,
            progress_percentage: progress_percentage(status.current_amount, status.goal_amount),
            goal_amount: status.goal_amount,
            current_amount: status.current_amount,
            current_price: status.current_price,
            oracle_price,
            time_remaining: status.time_remaining,
            creator,
            is_locked: status.is_locked,
            unlock_reason: status.unlock_reason,
            last_snapshot_at: Some(Utc::now()),
        }
    }

    /// Stand-in kept in the registry while reads fail transiently
    pub fn placeholder(address: Address, lock_kind: LockKind) -> Self {
        Self {
            address,
            balance: 0,
            lock_kind,
            unlock_time: 0,
            target_price: 0,
            goal_amount: 0,
            current_amount: 0,
            progress_percentage: 0.0,
            current_price: 0,
            oracle_price: 0,
            time_remaining: 0,
            creator: Address::ZERO,
            is_locked: true,
            unlock_reason: PENDING_REASON.to_string(),
            last_snapshot_at: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.last_snapshot_at.is_none()
    }

    /// Eligible for a withdrawal attempt according to this snapshot
    pub fn is_withdrawable(&self) -> bool {
        !self.is_placeholder() && !self.is_locked && self.balance > 0
    }

    /// One-line summary for CLI output
    pub fn summary(&self) -> String {
        let condition = if self.is_placeholder() {
            PENDING_REASON.to_string()
        } else if !self.is_locked {
            "unlocked".to_string()
        } else {
            match self.lock_kind {
                LockKind::Time => format!("unlocks in {}", format_duration(self.time_remaining)),
                LockKind::Price => format!(
                    "price {:.2} / target {:.2}",
                    self.current_price as f64 / 1e8,
                    self.target_price as f64 / 1e8
                ),
                LockKind::Goal => format!(
                    "{:.1}% of {} ETH",
                    self.progress_percentage,
                    format_ether(self.goal_amount)
                ),
            }
        };

        format!(
            "{}  {:<5}  {:>12} ETH  {}",
            self.address,
            self.lock_kind,
            format_ether(self.balance),
            condition
        )
    }
}

/// `current / goal * 100`, clamped to [0, 100]; NaN (0/0) becomes 0
pub fn progress_percentage(current: u128, goal: u128) -> f64 {
    let pct = current as f64 / goal as f64 * 100.0;
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

/// Outcome of one snapshot read
#[derive(Debug, Clone)]
pub enum SnapshotOutcome {
    /// Every read succeeded
    Fresh(Vault),
    /// Address is not a valid/compatible vault; drop it for good
    Retired { address: Address, reason: String },
    /// Reads failed transiently; carry the placeholder instead
    Pending { vault: Vault, reason: String },
}

impl SnapshotOutcome {
    pub fn address(&self) -> Address {
        match self {
            SnapshotOutcome::Fresh(v) => v.address,
            SnapshotOutcome::Retired { address, .. } => *address,
            SnapshotOutcome::Pending { vault, .. } => vault.address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WEI_PER_ETH;

    fn status(is_locked: bool, price: bool, goal: bool) -> LockStatus {
        LockStatus {
            is_locked,
            current_price: 0,
            time_remaining: 0,
            is_price_based: price,
            is_goal_based: goal,
            current_amount: WEI_PER_ETH / 2,
            goal_amount: WEI_PER_ETH,
            progress_percentage: 50,
            unlock_reason: "Goal not reached".to_string(),
        }
    }

    #[test]
    fn test_lock_kind_derivation() {
        assert_eq!(LockKind::from_flags(true, false), LockKind::Price);
        assert_eq!(LockKind::from_flags(false, true), LockKind::Goal);
        assert_eq!(LockKind::from_flags(false, false), LockKind::Time);
        // Both flags set never happens on-chain; price takes precedence
        assert_eq!(LockKind::from_flags(true, true), LockKind::Price);
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(progress_percentage(WEI_PER_ETH / 2, WEI_PER_ETH), 50.0);
        assert_eq!(progress_percentage(0, 0), 0.0);
        assert_eq!(progress_percentage(5, 0), 100.0);
        assert_eq!(progress_percentage(3 * WEI_PER_ETH, WEI_PER_ETH), 100.0);
    }

    #[test]
    fn test_goal_vault_from_reads() {
        let vault = Vault::from_reads(
            Address::ZERO,
            WEI_PER_ETH / 2,
            1_900_000_000,
            Address::ZERO,
            0,
            status(true, false, true),
            0,
        );
        assert_eq!(vault.lock_kind, LockKind::Goal);
        assert_eq!(vault.progress_percentage, 50.0);
        assert!(!vault.is_placeholder());
        assert!(!vault.is_withdrawable());
    }

    #[test]
    fn test_placeholder() {
        let vault = Vault::placeholder(Address::ZERO, LockKind::Price);
        assert!(vault.is_placeholder());
        assert!(vault.is_locked);
        assert_eq!(vault.balance, 0);
        assert_eq!(vault.unlock_reason, PENDING_REASON);
        assert!(!vault.is_withdrawable());
        assert!(vault.summary().ends_with(PENDING_REASON));
    }
}
