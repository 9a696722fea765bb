//! gateway - operator CLI for the multi-chain gateway
//!
//! Loads chain descriptors from a JSON config file and runs one read or
//! identity operation against a chain, printing the result as JSON.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use multichain_gateway::{
    GatewayConfig, HistoryQuery, ProviderRegistry, ReqwestTransport, RequestCache, TransactionQuery,
};

/// Main CLI arguments
#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Multi-chain wallet gateway: balances, history and address tools across chains")]
#[command(version)]
struct Args {
    /// Chain config file (defaults to the user config directory)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// List configured chains and the capabilities each can serve
    Chains,
    /// Native balance of an address
    Balance { chain: String, address: String },
    /// Native and token balances of an address
    Tokens { chain: String, address: String },
    /// Recent transactions of an address
    History {
        chain: String,
        address: String,
        /// Maximum number of transactions
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Look up one transaction
    Tx {
        chain: String,
        hash: String,
        /// Address whose perspective sets the direction
        #[arg(long)]
        address: Option<String>,
    },
    /// Current block height
    Height { chain: String },
    /// Check whether an address is valid for a chain
    Validate { chain: String, address: String },
    /// Canonical form of an address
    Normalize { chain: String, address: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to format result")?);
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let path = match path {
        Some(path) => path,
        None => GatewayConfig::default_path().ok_or_else(|| anyhow!("No config directory; pass --config"))?,
    };
    info!("Loading chain config from {}", path.display());
    GatewayConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let config = load_config(args.config)?;
    let transport = ReqwestTransport::new(config.transport.clone()).context("Failed to create HTTP transport")?;
    let cache = Arc::new(RequestCache::new(Arc::new(transport)));
    let registry = ProviderRegistry::new(config.chains, cache);

    match args.command {
        Commands::Chains => {
            let mut chains = Vec::new();
            for id in registry.chain_ids() {
                let provider = registry.get(&id).with_context(|| format!("Failed to build chain {}", id))?;
                let capabilities: Vec<String> = provider.capabilities().iter().map(|c| c.to_string()).collect();
                let providers: Vec<&str> = provider.providers().iter().map(|p| p.name.as_str()).collect();
                chains.push(json!({
                    "id": id,
                    "symbol": provider.chain().symbol,
                    "family": provider.chain().family,
                    "providers": providers,
                    "capabilities": capabilities,
                }));
            }
            print_json(&chains)?;
        }
        Commands::Balance { chain, address } => {
            let provider = registry.get(&chain)?;
            let balance = provider.native_balance(&address).await.context("Failed to get balance")?;
            print_json(&json!({
                "raw": balance.amount.raw_string(),
                "formatted": balance.amount.to_formatted(),
                "symbol": balance.symbol,
            }))?;
        }
        Commands::Tokens { chain, address } => {
            let provider = registry.get(&chain)?;
            let balances = provider.token_balances(&address).await.context("Failed to get token balances")?;
            print_json(&balances)?;
        }
        Commands::History { chain, address, limit } => {
            let provider = registry.get(&chain)?;
            let query = HistoryQuery { address, limit };
            let history = provider.transaction_history(&query).await.context("Failed to get history")?;
            print_json(&history)?;
        }
        Commands::Tx { chain, hash, address } => {
            let provider = registry.get(&chain)?;
            let query = TransactionQuery { hash, address };
            let transaction = provider.transaction(&query).await.context("Failed to get transaction")?;
            print_json(&transaction)?;
        }
        Commands::Height { chain } => {
            let provider = registry.get(&chain)?;
            let height = provider.block_height().await.context("Failed to get block height")?;
            println!("{}", height);
        }
        Commands::Validate { chain, address } => {
            let provider = registry.get(&chain)?;
            print_json(&json!({ "address": address, "valid": provider.is_valid_address(&address) }))?;
        }
        Commands::Normalize { chain, address } => {
            let provider = registry.get(&chain)?;
            let normalized = provider.normalize_address(&address)?;
            println!("{}", normalized);
        }
    }

    Ok(())
}
