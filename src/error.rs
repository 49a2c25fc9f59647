//! Error types for the vault keeper

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the vault keeper
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    // Contract errors
    #[error("Call exception (revert data: {})", .data.as_deref().unwrap_or("none"))]
    CallException { data: Option<String> },

    #[error("Contract reverted: {message}")]
    ContractReverted { message: String, data: Option<String> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ABI decode failed: {0}")]
    AbiDecode(String),

    // Withdrawal errors
    #[error("Wrong network: expected chain id {expected}, connected to {actual}")]
    InvalidNetwork { expected: u64, actual: u64 },

    #[error("Vault {vault} is still locked: {reason}")]
    StillLocked { vault: String, reason: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("No signer available for the active account")]
    SignerUnavailable,

    #[error("Transaction {0} reverted on-chain")]
    TransactionReverted(String),

    #[error("Transaction {hash} not confirmed after {secs}s")]
    ConfirmationTimeout { hash: String, secs: u64 },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure taxonomy used by the engine to decide registry and ledger membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure, retried with bounded backoff
    TransientNetwork,
    /// Provider throttling, same retry path as transient failures
    RateLimited,
    /// Address is not a valid/compatible vault; drop it permanently
    IncompatibleOrMissingContract,
    /// Nothing to withdraw (or not enough to pay for the attempt)
    InsufficientFunds,
    /// Chain still reports the vault as locked
    StillLocked,
    /// Connected to the wrong chain
    InvalidNetwork,
    /// No active signer
    SignerUnavailable,
    /// Anything else; propagated to the caller without retry
    Fatal,
}

fn rate_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\b429\b|too many requests|rate.?limit|compute units per second)")
            .expect("Invalid rate limit regex")
    })
}

fn connection_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(econnreset|connection reset|socket hang up|broken pipe|connection closed)")
            .expect("Invalid connection regex")
    })
}

impl Error {
    /// Classify a raw provider error message
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if rate_limit_pattern().is_match(&message) {
            Error::RateLimited(message)
        } else if connection_pattern().is_match(&message) {
            Error::RpcConnection(message)
        } else {
            Error::Rpc(message)
        }
    }

    /// Map onto the engine's failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RpcConnection(_) | Error::RpcTimeout(_) => ErrorKind::TransientNetwork,
            Error::RateLimited(_) => ErrorKind::RateLimited,
            Error::CallException { .. } if self.is_missing_contract() => {
                ErrorKind::IncompatibleOrMissingContract
            }
            Error::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Error::StillLocked { .. } => ErrorKind::StillLocked,
            Error::InvalidNetwork { .. } => ErrorKind::InvalidNetwork,
            Error::SignerUnavailable => ErrorKind::SignerUnavailable,
            _ => ErrorKind::Fatal,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RateLimited
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::RpcTimeout(_))
    }

    /// Empty revert data on a call exception: nothing answered at this address
    pub fn is_missing_contract(&self) -> bool {
        match self {
            Error::CallException { data } => match data.as_deref() {
                None => true,
                Some(d) => d.is_empty() || d == "0x",
            },
            _ => false,
        }
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Error::RpcConnection(e.to_string())
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            Error::RateLimited(e.to_string())
        } else {
            Error::from_provider_message(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from hex decoding errors
impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::AbiDecode(format!("invalid hex: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_message_classification() {
        assert!(matches!(
            Error::from_provider_message("HTTP 429 Too Many Requests"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_provider_message("Your app has exceeded its compute units per second capacity"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_provider_message("rate limit exceeded"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_provider_message("read ECONNRESET"),
            Error::RpcConnection(_)
        ));
        assert!(matches!(
            Error::from_provider_message("header not found"),
            Error::Rpc(_)
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RateLimited("429".into()).is_retryable());
        assert!(Error::RpcConnection("reset".into()).is_retryable());
        assert!(Error::RpcTimeout(30_000).is_retryable());
        assert!(Error::RpcTimeout(30_000).is_timeout());
        assert!(!Error::InvalidArgument("bad".into()).is_retryable());
        assert!(!Error::InvalidNetwork { expected: 1, actual: 5 }.is_retryable());
        assert!(!Error::ContractReverted {
            message: "execution reverted: locked".into(),
            data: Some("0x08c379a0".into()),
        }
        .is_retryable());
    }

    #[test]
    fn test_missing_contract_signature() {
        assert!(Error::CallException { data: None }.is_missing_contract());
        assert!(Error::CallException { data: Some("0x".into()) }.is_missing_contract());
        assert!(!Error::CallException { data: Some("0x08c379a0".into()) }.is_missing_contract());
        assert!(!Error::Rpc("timeout".into()).is_missing_contract());

        assert_eq!(
            Error::CallException { data: None }.kind(),
            ErrorKind::IncompatibleOrMissingContract
        );
        assert_eq!(
            Error::CallException { data: Some("0xdead".into()) }.kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(Error::SignerUnavailable.kind(), ErrorKind::SignerUnavailable);
        assert_eq!(
            Error::StillLocked { vault: "0x1".into(), reason: "time".into() }.kind(),
            ErrorKind::StillLocked
        );
        assert_eq!(
            Error::InsufficientFunds("empty".into()).kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(
            Error::MaxRetriesExceeded { attempts: 3, last: "429".into() }.kind(),
            ErrorKind::Fatal
        );
    }
}
