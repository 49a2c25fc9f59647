//! Vault Keeper - automatic withdrawals from time-, price- and goal-locked vaults
//!
//! # WARNING
//! - Withdrawals are real transactions signed by the configured signer endpoint.
//! - Every submission spends gas, including ones that revert.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use vault_keeper::cli::commands;
use vault_keeper::config::Config;

/// Vault Keeper - watches vaults and withdraws them once unlocked
#[derive(Parser)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "keeper.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch vaults and withdraw them automatically as they unlock
    Run {
        /// Account to watch (default: signer.account)
        #[arg(long)]
        account: Option<String>,
    },

    /// List vaults with their lock state
    List {
        /// Account to list (default: signer.account)
        #[arg(long)]
        account: Option<String>,
    },

    /// Withdraw a vault now
    Withdraw {
        /// Vault address
        vault: String,

        /// Signing account (default: signer.account)
        #[arg(long)]
        account: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Deposit ETH into a vault
    Deposit {
        /// Vault address
        vault: String,

        /// Amount in ETH
        amount: String,

        /// Signing account (default: signer.account)
        #[arg(long)]
        account: Option<String>,
    },

    /// Create a new vault through the factory
    Create {
        /// Seconds until the time lock expires
        #[arg(long, value_name = "SECS")]
        unlock_in: u64,

        /// Unlock once the oracle price reaches this value (USD)
        #[arg(long, conflicts_with = "goal")]
        target_price: Option<f64>,

        /// Unlock once deposits reach this amount (ETH)
        #[arg(long)]
        goal: Option<String>,

        /// Initial deposit in ETH
        #[arg(long, default_value = "0")]
        deposit: String,

        /// Signing account (default: signer.account)
        #[arg(long)]
        account: Option<String>,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check node, oracle and signer
    Health,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vault_keeper=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();
    init_tracing(cli.json);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run { account } => commands::run(&config, account.as_deref()).await,
        Commands::List { account } => commands::list(&config, account.as_deref()).await,
        Commands::Withdraw {
            vault,
            account,
            force,
        } => commands::withdraw(&config, &vault, account.as_deref(), force).await,
        Commands::Deposit {
            vault,
            amount,
            account,
        } => commands::deposit(&config, &vault, &amount, account.as_deref()).await,
        Commands::Create {
            unlock_in,
            target_price,
            goal,
            deposit,
            account,
        } => {
            commands::create(
                &config,
                unlock_in,
                target_price,
                goal.as_deref(),
                &deposit,
                account.as_deref(),
            )
            .await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
