//! Aethernova presale desk CLI.
//!
//! Components:
//! - CLI (clap derive) for config/flags;
//! - Layered config (defaults, file, `PRESALE__*` env) with network presets;
//! - Structured logging (tracing_subscriber, JSON or text);
//! - JSON-RPC chain adapter with chain id verification;
//! - Refresh loop and transaction waits with graceful shutdown (ctrl_c + CancellationToken).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aethernova_presale::chain::eth::EthChain;
use aethernova_presale::chain::AccountSlot;
use aethernova_presale::config::{self, NetworkPreset};
use aethernova_presale::poller;
use aethernova_presale::prelude::*;
use aethernova_presale::telemetry;

#[derive(Debug, Parser)]
#[command(name = "aethernova-presale", author, version, about = "Aethernova presale desk")]
struct Cli {
    /// Config file (TOML/YAML/JSON); auto-discovered when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the testnet preset
    #[arg(long)]
    testnet: bool,

    /// Sender address (overrides config; default: first node account)
    #[arg(long, value_name = "ADDR")]
    account: Option<String>,

    /// JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Log filter override (e.g. info,aethernova_presale=debug)
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the sale snapshot, predicates and balances
    Status,
    /// Keep the snapshot fresh until Ctrl-C
    Watch,
    /// Show the amounts a payment of AMOUNT would resolve to
    Quote { amount: String },
    /// Approve the sale contract to spend the payment token
    Approve,
    /// Invest AMOUNT of the payment token
    Deposit { amount: String },
    /// Claim purchased tokens
    Claim,
}

type Client = PresaleClient<EthChain, EthChain>;

#[derive(Serialize)]
struct StatusReport {
    account: Address,
    snapshot: SaleSnapshot,
    eligibility: Eligibility,
    amount: AmountPair,
    payment_balance: Decimal,
    approved: bool,
}

#[derive(Serialize)]
struct TxReport {
    confirmation: Confirmation,
    transactions: Vec<TransactionRecord>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn resolve_account(cli: &Cli, cfg: &config::Config, chain: &EthChain) -> Result<Address> {
    if let Some(a) = &cli.account {
        return a
            .parse()
            .map_err(|e| anyhow!("invalid --account `{a}`: {e}"));
    }
    if let Some(a) = cfg.account()? {
        return Ok(a);
    }
    chain
        .accounts()
        .await
        .context("list node accounts")?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no account: pass --account or set PRESALE__ACCOUNT__ADDRESS"))
}

fn report(client: &Client, account: Address) -> StatusReport {
    let s = client.session();
    StatusReport {
        account,
        snapshot: s.snapshot(),
        eligibility: s.eligibility(),
        amount: s.amount_pair(),
        payment_balance: s.payment_balance(),
        approved: s.is_approved(),
    }
}

async fn watch(client: Arc<Client>, account: Address, cfg: &config::Config) -> Result<()> {
    let mut events = client.session().subscribe();
    let slot = Arc::new(AccountSlot::new(Some(account)));
    let handle = poller::spawn(client.clone(), slot, cfg.poller())?;
    let cancel = client.shutdown_token();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => match ev {
                Ok(SessionEvent::SnapshotApplied { seq }) => {
                    let s = client.session();
                    let snap = s.snapshot();
                    let e = s.eligibility();
                    info!(
                        seq,
                        phase = ?snap.phase,
                        sold = %snap.sold,
                        max_sold = %snap.max_sold,
                        deposited = %snap.deposited,
                        price = %snap.price_in_quote,
                        can_invest = e.can_invest,
                        can_claim = e.can_claim,
                        sold_out = e.is_sold_out,
                        "snapshot"
                    );
                }
                Ok(SessionEvent::RefreshFailed { error }) => warn!(%error, "refresh failed"),
                Ok(other) => debug!(?other, "session event"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.shutdown().await.context("join refresh loop")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let preset = cli.testnet.then_some(NetworkPreset::Testnet);
    let cfg = config::load(cli.config.as_deref(), preset).context("load config")?;

    let mut logging = cfg.logging();
    logging.json |= cli.json_logs;
    if let Some(f) = &cli.log_filter {
        logging.filter = Some(f.clone());
    }
    telemetry::init(logging)?;
    info!(?cfg, "config loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let chain = Arc::new(
        EthChain::connect(
            &cfg.network.rpc_url,
            Some(cfg.chain_id()),
            cfg.network.connect_retry,
        )
        .await
        .context("connect rpc")?,
    );
    let account = resolve_account(&cli, &cfg, &chain).await?;
    let contracts = cfg.sale_contracts()?;
    let client = Arc::new(
        PresaleClient::new(chain.clone(), chain, contracts, cfg.client_timing())?
            .with_shutdown(cancel.clone()),
    );

    if let Command::Watch = cli.command {
        info!(?account, "press Ctrl-C to stop");
        watch(client, account, &cfg).await?;
        info!("bye");
        return Ok(());
    }

    client.connect(Some(account)).await;

    match &cli.command {
        Command::Status => print_json(&report(&client, account))?,
        Command::Quote { amount } => {
            client.session().on_payment_amount_finalize(amount);
            print_json(&client.session().amount_pair())?;
        }
        Command::Approve | Command::Deposit { .. } | Command::Claim => {
            let confirmation = match &cli.command {
                Command::Approve => client.approve().await,
                Command::Deposit { amount } => client.deposit(amount).await,
                _ => client.claim().await,
            }?;
            print_json(&TxReport {
                confirmation,
                transactions: client.session().transactions(),
            })?;
        }
        Command::Watch => {}
    }

    Ok(())
}
