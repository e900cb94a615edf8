//! veflow - vote-escrow DEX companion
//!
//! Run with: cargo run -- <command>
//!
//! Read commands (stats, balance, pairs, vests, rewards) only need RPC_URL
//! and an account.
//! Flow commands (delegate, undelegate, autolock, reset, claim) also need
//! PRIVATE_KEY.

use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use veflow::app::App;
use veflow::config::Config;
use veflow::events::Event;
use veflow::rewards::Reward;
use veflow::sequencer::{TransactionRecord, TxStatus};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batched reads and staged transactions for a vote-escrow DEX")]
struct Cli {
    /// TOML config file (defaults to environment / .env)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read for this account instead of the configured one
    #[arg(long)]
    account: Option<Address>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gov token price, TVL, circulating supply and market cap
    Stats,
    /// Native and gov token balances of the account
    Balance,
    /// Pairs from the snapshot, enriched on-chain
    Pairs,
    /// The account's veNFTs
    Vests,
    /// Claimable bribes, gauge rewards and rebase
    Rewards {
        #[arg(long)]
        token_id: Option<u64>,
    },
    /// Delegate a veNFT to the vote manager
    Delegate {
        #[arg(long)]
        token_id: u64,
        #[arg(long, default_value_t = false)]
        autolock: bool,
    },
    Undelegate {
        #[arg(long)]
        token_id: u64,
    },
    /// Enable (or with --disable, disable) autolock
    Autolock {
        #[arg(long)]
        token_id: u64,
        #[arg(long, default_value_t = false)]
        disable: bool,
    },
    /// Claim bribes and rebase, then reset votes
    Reset {
        #[arg(long)]
        token_id: u64,
    },
    /// Claim every pending reward
    Claim {
        #[arg(long)]
        token_id: Option<u64>,
    },
    /// Keep polling the pairs snapshot and print events
    Watch,
    /// Write the effective configuration to a TOML file
    SaveConfig { path: PathBuf },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!("{}", style(" 🗳  VEFLOW - veNFT rewards, votes & delegation").cyan().bold());
    println!("{}", style("    Multicall3 batching | Staged transactions").cyan());
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn short(addr: Address) -> String {
    let s = format!("{:?}", addr);
    format!("{}…{}", &s[..6], &s[s.len() - 4..])
}

// ============================================
// FLOW PROGRESS
// ============================================

/// Spinner fed by bus events until the subscription is dropped
async fn show_progress(mut events: UnboundedReceiver<Event>) {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(template);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));

    while let Some(event) = events.recv().await {
        match event {
            Event::TxAdded(record) => spinner.set_message(record.title),
            Event::TxStatus(update) => {
                let text = update.description.unwrap_or_else(|| update.status.to_string());
                match update.status {
                    TxStatus::Done => spinner.println(format!("{} {}", style("✓").green(), text)),
                    TxStatus::Rejected => spinner.println(format!("{} {}", style("✗").red(), text)),
                    _ => spinner.set_message(text),
                }
            }
            Event::Error(msg) => spinner.println(format!("{} {}", style("⚠").yellow(), msg)),
            _ => {}
        }
    }
    spinner.finish_and_clear();
}

fn print_record(record: &TransactionRecord) {
    println!();
    println!("{} {}", style(&record.title).bold(), style(format!("[{}]", record.status())).dim());
    for step in &record.steps {
        let mark = match step.status {
            TxStatus::Done => style("✓").green(),
            TxStatus::Rejected => style("✗").red(),
            _ => style("·").dim(),
        };
        match (&step.tx_hash, &step.error) {
            (_, Some(err)) => println!("  {} {} ({})", mark, step.description, err),
            (Some(hash), None) => println!("  {} {} {:?}", mark, step.description, hash),
            (None, None) => println!("  {} {}", mark, step.description),
        }
    }
    if record.is_success() {
        println!("{} {}", style("✓").green(), record.verb);
    }
}

async fn run_flow<F>(app: &App, flow: F) -> Result<()>
where
    F: std::future::Future<Output = veflow::error::ChainResult<TransactionRecord>>,
{
    if !app.config().has_signer() {
        return Err(eyre!("PRIVATE_KEY is required to send transactions"));
    }

    let (id, events) = app.bus().subscribe_channel();
    let progress = tokio::spawn(show_progress(events));

    let result = flow.await;
    app.bus().unsubscribe(id);
    // channel closes with the subscription
    let _ = progress.await;

    let record = result?;
    print_record(&record);
    if record.is_success() {
        Ok(())
    } else {
        Err(eyre!("{} did not complete", record.title))
    }
}

// ============================================
// READ COMMANDS
// ============================================

async fn print_stats(app: &App) -> Result<()> {
    let snapshot = app.snapshot().await?;
    let gov = app.config().contracts.gov_token;

    match snapshot.price_of(gov) {
        Some(price) => println!("{:<20} ${:.4}", "Gov token price", price),
        None => println!("{:<20} -", "Gov token price"),
    }
    println!("{:<20} ${:.0}", "TVL", snapshot.tvl);
    println!("{:<20} ${:.0}", "TBV", snapshot.tbv);

    let supply = app.circulating_supply().await?;
    println!("{:<20} {}", "Circulating supply", supply.formatted());
    match app.market_cap().await {
        Ok(cap) => println!("{:<20} ${:.0}", "Market cap", cap),
        Err(e) => println!("{:<20} - ({})", "Market cap", e),
    }
    Ok(())
}

async fn print_balance(app: &App) -> Result<()> {
    let balances = app.balances().await?;
    println!("{:<8} {}", "Native", balances.native.formatted());
    println!("{:<8} {}", "Gov", balances.gov.formatted());
    Ok(())
}

async fn print_pairs(app: &App) -> Result<()> {
    let pairs = app.pairs().await?;

    println!("{:<24} {:>14} {:>9} {:>22} {:>9}", "PAIR", "TVL ($)", "APR %", "LP BALANCE", "VOTES %");
    for pair in pairs.iter() {
        let votes = pair
            .gauge
            .as_ref()
            .map(|g| if g.is_alive { g.weight_percent.clone() } else { "killed".to_string() })
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>14.2} {:>9.2} {:>22} {:>9}",
            pair.symbol,
            pair.tvl,
            pair.apr,
            pair.balance.formatted(),
            votes
        );
    }
    println!();
    println!("{} {} pairs", style("✓").green(), pairs.len());
    Ok(())
}

async fn print_vests(app: &App) -> Result<()> {
    let nfts = app.vest_nfts().await;
    if nfts.is_empty() {
        println!("No veNFTs found for this account");
        return Ok(());
    }

    let apr = app.vests().strategies_apr().await;
    println!("Vote manager average APR: {}%", apr);
    println!();
    for nft in &nfts {
        let delegated = if nft.delegated {
            format!("[delegated {}%] ", app.vests().nft_apr(nft.id).await)
        } else {
            String::new()
        };
        println!(
            "#{:<6} locked {:>24}  power {:>24}  ends {}  {}{}{}",
            nft.id,
            nft.lock_amount.formatted(),
            nft.lock_value.formatted(),
            i64::try_from(nft.lock_ends)
                .ok()
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| nft.lock_ends.to_string()),
            if nft.voted { "[voted] " } else { "" },
            delegated,
            if nft.autolock { "[autolock]" } else { "" },
        );
    }
    Ok(())
}

async fn print_rewards(app: &App, token_id: Option<U256>) -> Result<()> {
    let bundle = app.reward_balances(token_id).await?;
    if bundle.is_empty() {
        println!("Nothing to claim");
        return Ok(());
    }

    for reward in bundle.iter() {
        let kind = reward.reward_type().to_string();
        match reward {
            Reward::Bribe(b) => {
                let earned: Vec<String> = b
                    .positive()
                    .map(|e| format!("{} {}", e.earned.formatted(), e.token.symbol))
                    .collect();
                println!("{:<13} {:<24} {}", kind, b.pair.symbol, earned.join(", "));
            }
            Reward::Reward(r) => {
                println!("{:<13} {:<24} {}", kind, r.pair.symbol, r.earned.formatted());
            }
            Reward::Distribution(d) => {
                println!("{:<13} {:<24} {}", kind, format!("veNFT #{}", d.token_id), d.earned.formatted());
            }
        }
    }
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    let (_id, mut events) = app.bus().subscribe_channel();
    let poller = app.watch();

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                Event::DataUpdated => match app.snapshot().await {
                    Ok(snapshot) => info!("📊 {} pairs, TVL ${:.0}", snapshot.data.len(), snapshot.tvl),
                    Err(e) => error!("Snapshot unavailable: {}", e),
                },
                Event::Error(msg) => error!("{}", msg),
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                poller.abort();
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("veflow=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if cli.account.is_some() {
        config.account_address = cli.account;
    }
    config.validate()?;

    if let Command::SaveConfig { path } = &cli.command {
        config.save_to_file(path)?;
        println!("{} Configuration written to {}", style("✓").green(), path.display());
        return Ok(());
    }

    print_banner();
    config.print_summary();
    println!();

    let app = App::connect(config)?;
    if let Ok(account) = app.account() {
        info!("Account: {}", short(account));
    }

    match cli.command {
        Command::Stats => print_stats(&app).await,
        Command::Balance => print_balance(&app).await,
        Command::Pairs => print_pairs(&app).await,
        Command::Vests => print_vests(&app).await,
        Command::Rewards { token_id } => print_rewards(&app, token_id.map(U256::from)).await,
        Command::Delegate { token_id, autolock } => {
            run_flow(&app, app.delegate(Some(U256::from(token_id)), autolock)).await
        }
        Command::Undelegate { token_id } => run_flow(&app, app.undelegate(Some(U256::from(token_id)))).await,
        Command::Autolock { token_id, disable } => {
            run_flow(&app, app.set_autolock(Some(U256::from(token_id)), !disable)).await
        }
        Command::Reset { token_id } => run_flow(&app, app.reset(Some(U256::from(token_id)))).await,
        Command::Claim { token_id } => run_flow(&app, app.claim_all(token_id.map(U256::from))).await,
        Command::Watch => watch(&app).await,
        Command::SaveConfig { .. } => Ok(()),
    }
}
