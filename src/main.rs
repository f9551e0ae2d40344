use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use walletsync::{
    addresses::WalletSeed,
    balances::{AggregatedToken, BalanceAggregator, HiddenTokens},
    cache::QueryCache,
    config::{load_config_from_path, validate_config, Config, CONFIG_FILE_PATH},
    gateway::{ChainGateway, ExponentialBackoff},
    logger::{self, LogTag},
    types::TransactionStatus,
    wallet::{WalletContext, WalletDeps},
    worth::WorthCalculator,
};

#[derive(Parser)]
#[command(name = "walletsync")]
#[command(
    about = "Address discovery, balances and transaction status for HD wallets",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML); missing file means defaults
    #[arg(long, default_value = CONFIG_FILE_PATH)]
    config: String,

    /// Wallet id used to scope persisted state
    #[arg(long, default_value = "default")]
    wallet: String,

    /// Subsystem debug output, read through the arguments module
    #[arg(long = "debug-discovery", global = true)]
    debug_discovery: bool,
    #[arg(long = "debug-cache", global = true)]
    debug_cache: bool,
    #[arg(long = "debug-pending", global = true)]
    debug_pending: bool,
    #[arg(long, global = true)]
    verbose: bool,
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan derivation indices for used addresses
    Discover {
        #[arg(long)]
        seed_hex: String,
        /// Indices to treat as known-active without querying
        #[arg(long = "skip")]
        skip: Vec<u32>,
    },
    /// Aggregated, classified balances of the given addresses
    Balances {
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
        #[arg(long)]
        include_hidden: bool,
    },
    /// Total fiat worth of the given addresses
    Worth {
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
    },
    /// Status of a submitted transaction
    Status {
        #[arg(long)]
        hash: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config_from_path(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Failed to load configuration:".red().bold(), e);
            std::process::exit(1);
        }
    };
    logger::init(&config.logging);

    let outcome = run(cli, config).await;
    if let Err(e) = &outcome {
        logger::error(LogTag::System, &format!("{:#}", e));
    }
    logger::flush();
    if outcome.is_err() {
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    validate_config(&config)?;
    let deps = WalletDeps::from_config(&config).context("building gateway and store")?;

    match cli.command {
        Command::Discover { seed_hex, skip } => {
            let seed =
                WalletSeed::from_hex(&seed_hex).map_err(|e| anyhow!("invalid seed hex: {}", e))?;
            let wallet = WalletContext::unlock(cli.wallet, seed, config, deps).await?;
            let report = wallet
                .discover_addresses(skip.into_iter().collect::<BTreeSet<u32>>())
                .await;

            if let Ok(report) = &report {
                logger::info(LogTag::Discovery, &format!(
                    "{} highest contiguous index {:?}, {} batches scanned",
                    "Discovery".bold(),
                    report.result.highest_contiguous_index,
                    report.batches_scanned
                ));
                for address in wallet.addresses() {
                    let marker = if address.is_default { "*" } else { " " };
                    logger::info(LogTag::Discovery, &format!(
                        " {} {:>4}  {}  (group {})",
                        marker, address.derivation_index, address.hash, address.group
                    ));
                }
                if let Some(err) = &report.error {
                    logger::warning(
                        LogTag::Discovery,
                        &format!("{} {}", "Incomplete:".yellow(), err),
                    );
                }
            }
            wallet.lock().await?;
            report?;
        }

        Command::Balances {
            addresses,
            include_hidden,
        } => {
            let (aggregator, _) = standalone(&config, &deps);
            let out = aggregator
                .aggregate(
                    &addresses,
                    &config.gateway.network_id,
                    &HiddenTokens::new(),
                    include_hidden,
                )
                .await;

            print_section("Listed", &out.listed_fts);
            print_section("Unlisted", &out.unlisted_fts);
            print_section("NFTs", &out.nfts);
            print_section("Non-standard", &out.non_standard);
            if out.has_error {
                for err in &out.errors {
                    logger::warning(LogTag::Balances, &format!("{} {}", "error:".red(), err));
                }
            }
        }

        Command::Worth { addresses } => {
            let (aggregator, worth) = standalone(&config, &deps);
            let balances = aggregator
                .wallet_balances(&addresses, &config.gateway.network_id)
                .await;
            if let Some(err) = &balances.error {
                logger::warning(
                    LogTag::Worth,
                    &format!("{} {}", "partial balances:".yellow(), err),
                );
            }
            match worth.wallet_worth(&balances.value.unwrap_or_default()).await {
                Some(total) => logger::info(
                    LogTag::Worth,
                    &format!("{} {:.2} {}", "Worth".bold(), total, config.pricing.currency),
                ),
                None => logger::info(
                    LogTag::Worth,
                    &format!("{} unknown (no price available)", "Worth".bold()),
                ),
            }
        }

        Command::Status { hash } => {
            let status = deps.gateway.get_transaction_status(&hash).await?;
            match status {
                TransactionStatus::Pending => {
                    logger::info(LogTag::Pending, &format!("{} {}", hash, "pending".yellow()))
                }
                TransactionStatus::Mempooled => {
                    logger::info(LogTag::Pending, &format!("{} {}", hash, "in mempool".cyan()))
                }
                TransactionStatus::Confirmed(tx) => logger::info(LogTag::Pending, &format!(
                    "{} {} in block {}",
                    hash,
                    "confirmed".green(),
                    tx.block_hash.unwrap_or_else(|| "?".to_string())
                )),
            }
        }
    }
    Ok(())
}

/// Aggregator and worth calculator over a throwaway cache, no wallet needed
fn standalone(config: &Config, deps: &WalletDeps) -> (BalanceAggregator, WorthCalculator) {
    let retry = ExponentialBackoff::from_config(&config.retry);
    let cache = QueryCache::new(&config.cache, retry.clone());
    let gateway: Arc<dyn ChainGateway> = Arc::clone(&deps.gateway);
    let worth = WorthCalculator::new(
        cache.clone(),
        Arc::clone(&gateway),
        Arc::clone(&deps.listing),
        retry,
        config.pricing.currency.clone(),
        Duration::from_millis(config.cache.price_stale_ms),
    );
    let aggregator = BalanceAggregator::new(
        cache,
        gateway,
        Arc::clone(&deps.listing),
        worth.clone(),
        &config.gateway,
    );
    (aggregator, worth)
}

fn print_section(title: &str, tokens: &[AggregatedToken]) {
    if tokens.is_empty() {
        return;
    }
    logger::info(LogTag::Balances, &title.bold().to_string());
    for token in tokens {
        let worth = token
            .worth
            .map(|w| format!("{:.2}", w))
            .unwrap_or_else(|| "-".to_string());
        logger::info(LogTag::Balances, &format!(
            "  {:<24} {:>40} (locked {})  {}",
            token.name(),
            token.balance.total(),
            token.balance.locked(),
            worth
        ));
    }
}
