//! Vault Keeper Library
//!
//! Watches time-, price- and goal-locked vault contracts through a
//! rate-limited JSON-RPC node and withdraws each vault once its unlock
//! condition holds.

pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod rpc;
pub mod types;
pub mod vault;
pub mod withdraw;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use engine::{CreateVaultParams, VaultEngine};
pub use error::{Error, ErrorKind, Result};
pub use events::EngineEvent;
