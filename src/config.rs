//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::types::Address;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Outbound call budget shared by every component
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Rolling window length
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay; doubles after every failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Chain id the withdrawal executor insists on
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Vault factory contract
    #[serde(default)]
    pub factory_address: Option<Address>,
    /// Price oracle (Chainlink-style aggregator)
    #[serde(default)]
    pub oracle_address: Option<Address>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            factory_address: None,
            oracle_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Registry reconciliation interval
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Auto-withdrawal scan interval (independent of refresh)
    #[serde(default = "default_auto_withdraw_interval")]
    pub auto_withdraw_interval_secs: u64,
    /// Pause after a failed withdrawal before evaluating the next vault
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_secs: u64,
    /// Run the auto-withdrawal coordinator at all
    #[serde(default = "default_true")]
    pub auto_withdraw: bool,
    /// Give up on a vault after this many failed automatic withdrawals
    /// (unset = retry every scan for the whole session)
    #[serde(default)]
    pub max_auto_attempts: Option<u32>,
    /// Buffered engine events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            auto_withdraw_interval_secs: default_auto_withdraw_interval(),
            failure_cooldown_secs: default_failure_cooldown(),
            auto_withdraw: true,
            max_auto_attempts: None,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalConfig {
    /// Safety margin added on top of the gas estimate
    #[serde(default = "default_gas_margin_pct")]
    pub gas_margin_pct: u64,
    /// Receipt polling interval
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    /// Give up waiting for a receipt after this long
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            gas_margin_pct: default_gas_margin_pct(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SignerConfig {
    /// Account whose vaults are watched (key held by the signer endpoint)
    #[serde(default)]
    pub account: Option<Address>,
    /// Signer endpoint; defaults to the RPC endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8545".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_max_requests() -> usize {
    3
}

fn default_window_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_chain_id() -> u64 {
    11_155_111
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_auto_withdraw_interval() -> u64 {
    120
}

fn default_failure_cooldown() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    256
}

fn default_gas_margin_pct() -> u64 {
    20
}

fn default_confirmation_poll_ms() -> u64 {
    2000
}

fn default_confirmation_timeout() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix KEEPER_)
            .add_source(
                config::Environment::with_prefix("KEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc.endpoint)
            .with_context(|| format!("Invalid rpc.endpoint: {}", self.rpc.endpoint))?;

        if let Some(endpoint) = &self.signer.endpoint {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid signer.endpoint: {}", endpoint))?;
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_ms == 0 {
            anyhow::bail!("rate_limit.max_requests and rate_limit.window_ms must be positive");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        if self.engine.refresh_interval_secs == 0 || self.engine.auto_withdraw_interval_secs == 0 {
            anyhow::bail!("engine intervals must be positive");
        }

        if self.engine.event_capacity == 0 {
            anyhow::bail!("engine.event_capacity must be positive");
        }

        if self.engine.max_auto_attempts == Some(0) {
            anyhow::bail!("engine.max_auto_attempts must be at least 1 when set");
        }

        if self.withdrawal.gas_margin_pct > 100 {
            anyhow::bail!("withdrawal.gas_margin_pct cannot exceed 100");
        }

        if self.withdrawal.confirmation_poll_ms == 0 {
            anyhow::bail!("withdrawal.confirmation_poll_ms must be positive");
        }

        // Warn about settings that disable the core loop
        if !self.engine.auto_withdraw {
            tracing::warn!("engine.auto_withdraw is off - unlocked vaults will not be withdrawn automatically");
        }

        if self.chain.factory_address.is_none() {
            tracing::warn!("chain.factory_address not set - vault discovery will fail");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let opt = |a: &Option<Address>| {
            a.map(|a| a.to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };

        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Rate limit:
    {} requests / {}ms
  Retry:
    attempts: {}
    base delay: {}ms
  Chain:
    chain_id: {}
    factory: {}
    oracle: {}
  Engine:
    refresh every: {}s
    auto-withdraw: {} (every {}s, cooldown {}s, max attempts {})
  Withdrawal:
    gas margin: {}%
    confirmation timeout: {}s
  Signer:
    account: {}
    endpoint: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.rate_limit.max_requests,
            self.rate_limit.window_ms,
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.chain.chain_id,
            opt(&self.chain.factory_address),
            opt(&self.chain.oracle_address),
            self.engine.refresh_interval_secs,
            self.engine.auto_withdraw,
            self.engine.auto_withdraw_interval_secs,
            self.engine.failure_cooldown_secs,
            self.engine
                .max_auto_attempts
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.withdrawal.gas_margin_pct,
            self.withdrawal.confirmation_timeout_secs,
            opt(&self.signer.account),
            self.signer
                .endpoint
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(rpc endpoint)".to_string()),
        )
    }
}

/// Mask URL for display (hide API keys in query params and paths)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        return format!("{}?***", &url[..idx]);
    }
    // Infura/Alchemy style keys live in the last path segment
    match url::Url::parse(url) {
        Ok(parsed) if parsed.path().len() > 20 => {
            let mut masked = parsed.clone();
            masked.set_path("/***");
            masked.to_string()
        }
        _ => url.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
            },
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            chain: ChainConfig::default(),
            engine: EngineConfig::default(),
            withdrawal: WithdrawalConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}
