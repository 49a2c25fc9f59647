//! CLI command implementations

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use dialoguer::Confirm;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::chain::NodeSigner;
use crate::config::Config;
use crate::engine::{CreateVaultParams, VaultEngine};
use crate::events::EngineEvent;
use crate::rpc::NodeClient;
use crate::types::{format_duration, format_ether, parse_ether, Address};
use crate::vault::SnapshotOutcome;

/// Account from the flag, falling back to `signer.account`
fn resolve_account(config: &Config, account: Option<&str>) -> Result<Address> {
    match account {
        Some(a) => a.parse().context("Invalid --account"),
        None => config
            .signer
            .account
            .context("No account given: pass --account or set signer.account"),
    }
}

/// Signer backed by the configured signer endpoint (or the RPC node)
async fn node_signer(config: &Config, account: Address) -> Result<Arc<NodeSigner>> {
    let endpoint = config
        .signer
        .endpoint
        .clone()
        .unwrap_or_else(|| config.rpc.endpoint.clone());
    let node = Arc::new(NodeClient::new(
        endpoint,
        Duration::from_millis(config.rpc.timeout_ms),
    )?);
    let signer = NodeSigner::new(node, account);
    signer
        .verify()
        .await
        .with_context(|| format!("Signer endpoint does not manage {}", account))?;
    Ok(Arc::new(signer))
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::RegistryRefreshed { vaults } => info!("Watching {} vaults", vaults),
        EngineEvent::VaultRetired { vault, reason } => {
            warn!("Dropped {} (not a vault): {}", vault, reason)
        }
        EngineEvent::AutoWithdrawStarted { vault } => {
            println!("Auto-withdrawing from {}...", vault)
        }
        EngineEvent::WithdrawSucceeded {
            vault,
            tx_hash,
            amount,
            ..
        } => println!(
            "Withdrew {} ETH from {} (tx {})",
            format_ether(*amount),
            vault,
            tx_hash
        ),
        EngineEvent::WithdrawFailed {
            vault, error, kind, ..
        } => println!("Withdrawal from {} failed [{:?}]: {}", vault, kind, error),
    }
}

/// Watch the account's vaults and withdraw them as they unlock
pub async fn run(config: &Config, account: Option<&str>) -> Result<()> {
    let account = resolve_account(config, account)?;
    info!("Starting vault keeper for {}", account);

    let engine = VaultEngine::connect(config.clone())?;
    let mut events = engine.subscribe();
    let signer = node_signer(config, account).await?;
    engine.set_signer(signer).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Missed {} engine events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// One-off listing of the account's vaults
pub async fn list(config: &Config, account: Option<&str>) -> Result<()> {
    let account = resolve_account(config, account)?;
    let engine = VaultEngine::connect(config.clone())?;

    let outcomes = engine.scan(account).await?;
    println!("\n=== VAULTS OF {} ===\n", account);

    if outcomes.is_empty() {
        println!("No vaults.");
        return Ok(());
    }

    for outcome in &outcomes {
        match outcome {
            SnapshotOutcome::Fresh(vault) => println!("{}", vault.summary()),
            SnapshotOutcome::Pending { vault, reason } => {
                println!("{}  (read failed: {})", vault.summary(), reason)
            }
            SnapshotOutcome::Retired { address, .. } => {
                println!("{}  not a compatible vault", address)
            }
        }
    }
    println!();

    Ok(())
}

/// Withdraw one vault now
pub async fn withdraw(config: &Config, vault: &str, account: Option<&str>, force: bool) -> Result<()> {
    let vault: Address = vault.parse().context("Invalid vault address")?;
    let account = resolve_account(config, account)?;
    let engine = VaultEngine::connect(config.clone())?;

    let snapshot = engine.snapshot(vault).await?;
    println!("{}", snapshot.summary());
    if snapshot.is_locked {
        warn!("Chain reports {} as locked: {}", vault, snapshot.unlock_reason);
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Withdraw {} ETH from {}? This cannot be undone.",
                format_ether(snapshot.balance),
                vault
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Withdrawal cancelled by user");
            return Ok(());
        }
    }

    engine.attach_signer(node_signer(config, account).await?)?;
    match engine.try_withdraw(vault).await {
        Ok(result) => {
            println!("\nWithdrawal confirmed!");
            println!("Amount: {} ETH", format_ether(result.amount));
            println!("Transaction: {}", result.receipt.tx_hash);
            Ok(())
        }
        Err(e) => {
            error!("Withdrawal failed: {}", e);
            anyhow::bail!("Withdrawal from {} failed: {}", vault, e)
        }
    }
}

/// Deposit ETH into a vault
pub async fn deposit(config: &Config, vault: &str, amount: &str, account: Option<&str>) -> Result<()> {
    let vault: Address = vault.parse().context("Invalid vault address")?;
    let amount = parse_ether(amount)?;
    let account = resolve_account(config, account)?;

    let engine = VaultEngine::connect(config.clone())?;
    engine.attach_signer(node_signer(config, account).await?)?;

    let receipt = engine.deposit(vault, amount).await?;
    println!("\nDeposit confirmed!");
    println!("Transaction: {}", receipt.tx_hash);

    let snapshot = engine.snapshot(vault).await?;
    println!("{}", snapshot.summary());
    Ok(())
}

/// Create a vault through the factory
pub async fn create(
    config: &Config,
    unlock_in_secs: u64,
    target_price: Option<f64>,
    goal: Option<&str>,
    initial_deposit: &str,
    account: Option<&str>,
) -> Result<()> {
    let account = resolve_account(config, account)?;
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);

    let target_price = match target_price {
        Some(p) if p <= 0.0 || !p.is_finite() => anyhow::bail!("--target-price must be positive"),
        Some(p) => (p * 1e8).round() as u128,
        None => 0,
    };
    let params = CreateVaultParams {
        unlock_time: now + unlock_in_secs,
        target_price,
        goal_amount: goal.map(parse_ether).transpose()?.unwrap_or(0),
        initial_deposit: parse_ether(initial_deposit)?,
    };

    info!(
        "Creating vault: unlocks in {}, target price {}, goal {} ETH",
        format_duration(unlock_in_secs),
        params.target_price,
        format_ether(params.goal_amount)
    );

    let engine = VaultEngine::connect(config.clone())?;
    engine.attach_signer(node_signer(config, account).await?)?;

    let receipt = engine.create_vault(params).await?;
    println!("\nVault created!");
    println!("Transaction: {}", receipt.tx_hash);
    if let Some(address) = receipt.contract_address {
        println!("Vault: {}", address);
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check node, chain and signer
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== KEEPER HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let engine = VaultEngine::connect(config.clone())?;

    print!("RPC endpoint... ");
    let start = Instant::now();
    match engine.gateway().chain_id().await {
        Ok(chain_id) if chain_id == config.chain.chain_id => {
            println!("OK ({}ms, chain {})", start.elapsed().as_millis(), chain_id)
        }
        Ok(chain_id) => {
            println!(
                "WRONG NETWORK (chain {}, expected {})",
                chain_id, config.chain.chain_id
            );
            all_healthy = false;
        }
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Price oracle... ");
    match engine.gateway().latest_price().await {
        Ok(round) => println!(
            "OK ({:.2}, updated {}s ago)",
            round.price as f64 / 1e8,
            (Utc::now().timestamp() as u64).saturating_sub(round.updated_at)
        ),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Factory... ");
    match engine.gateway().factory() {
        Ok(factory) => println!("{}", factory),
        Err(e) => {
            println!("NOT SET: {}", e);
            all_healthy = false;
        }
    }

    print!("Signer... ");
    match config.signer.account {
        Some(account) => match node_signer(config, account).await {
            Ok(_) => println!("OK ({})", account),
            Err(e) => {
                println!("FAILED: {:#}", e);
                all_healthy = false;
            }
        },
        None => println!("NOT CONFIGURED (read-only)"),
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some checks failed. See the errors above.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_account() {
        let mut config = Config::default();
        assert!(resolve_account(&config, None).is_err());

        let configured = Address([0x11; 20]);
        config.signer.account = Some(configured);
        assert_eq!(resolve_account(&config, None).unwrap(), configured);

        let flag = "0x2222222222222222222222222222222222222222";
        assert_eq!(
            resolve_account(&config, Some(flag)).unwrap(),
            Address([0x22; 20])
        );
        assert!(resolve_account(&config, Some("0x1234")).is_err());
    }
}
