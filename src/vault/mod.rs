//! Vault model, snapshot reads and the reconciled registry

pub mod registry;
pub mod snapshot;
pub mod types;

pub use registry::{merge, MergeDecision, ReconcileReport, Reconciler, VaultRegistry};
pub use snapshot::SnapshotReader;
pub use types::{LockKind, SnapshotOutcome, Vault};
