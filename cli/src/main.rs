//! auctionindex CLI: ingest an NFT auction contract's events into SQLite and
//! inspect the result.
//!
//! Usage:
//! ```bash
//! # Listen until Ctrl-C (reads .env / environment)
//! ETH_RPC_URL=https://... CONTRACT_ADDRESS=0x... auctionindex run
//!
//! # Inspect the database
//! auctionindex status
//! auctionindex auction 7
//! auctionindex unreconciled
//! ```

mod logging;

use std::env;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use auctionindex_core::{
    AuctionStore, BidPolicy, CheckpointStore, ListenerConfig, RetryConfig, ZERO_ADDRESS,
};
use auctionindex_evm::{JsonRpcSource, JsonRpcSourceConfig, ListenerBuilder};
use auctionindex_storage::SqliteStorage;

use crate::logging::{init_tracing, LogConfig};

const DEFAULT_DATABASE: &str = "./auctions.db";

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run().await,
        "status" => cmd_status().await,
        "auction" => cmd_auction(&args[2..]).await,
        "unreconciled" => cmd_unreconciled().await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("auctionindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("auctionindex {}", env!("CARGO_PKG_VERSION"));
    println!("Ingest and reconcile NFT auction contract events\n");
    println!("USAGE:");
    println!("    auctionindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run             Listen for auction events until Ctrl-C");
    println!("    status          Show checkpoint and row counts");
    println!("    auction <ID>    Print one auction and its bids as JSON");
    println!("    unreconciled    List events that never found their auction");
    println!("    info            Show defaults");
    println!("    version         Print version");
    println!("    help            Print this help\n");
    println!("ENVIRONMENT (.env is read if present):");
    println!("    ETH_RPC_URL               HTTP JSON-RPC endpoint  [required for run]");
    println!("    ETH_WS_URL                WebSocket endpoint (push mode)");
    println!("    CONTRACT_ADDRESS          Auction contract        [required for run]");
    println!("    START_BLOCK               First block to ingest (default 0)");
    println!("    DATABASE_URL              SQLite path (default {DEFAULT_DATABASE})");
    println!("    CHAIN                     Chain label (default ethereum)");
    println!("    INDEXER_ID                Checkpoint key (default auctions)");
    println!("    BATCH_SIZE                Blocks per catch-up batch (default 1000)");
    println!("    POLL_INTERVAL_MS          Polling interval (default 5000)");
    println!("    REQUIRE_INCREASING_BIDS   Reject bids not above the current highest");
    println!("    LOG_LEVEL, LOG_JSON       Logging (RUST_LOG overrides LOG_LEVEL)");
}

// ─── Environment ─────────────────────────────────────────────────────────────

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_required(key: &str) -> Result<String> {
    env_opt(key).ok_or_else(|| anyhow!("{key} is required"))
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_opt(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}: {v}")))
        .transpose()
}

fn env_flag(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Listener settings from the environment, defaults for anything unset.
fn listener_config() -> Result<ListenerConfig> {
    let defaults = ListenerConfig::default();
    let bid_policy = if env_flag("REQUIRE_INCREASING_BIDS") {
        BidPolicy::RequireIncreasing
    } else {
        BidPolicy::TrustContract
    };
    Ok(ListenerConfig {
        id: env_opt("INDEXER_ID").unwrap_or(defaults.id),
        chain: env_opt("CHAIN").unwrap_or(defaults.chain),
        contract_address: env_required("CONTRACT_ADDRESS")?,
        start_block: env_parse("START_BLOCK")?.unwrap_or(defaults.start_block),
        batch_size: env_parse("BATCH_SIZE")?.unwrap_or(defaults.batch_size),
        poll_interval_ms: env_parse("POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval_ms),
        bid_policy,
        ..defaults
    })
}

async fn open_store() -> Result<Arc<SqliteStorage>> {
    let path = env_opt("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE.to_string());
    let store = SqliteStorage::open(&path)
        .await
        .with_context(|| format!("opening database {path}"))?;
    Ok(Arc::new(store))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_run() -> Result<()> {
    init_tracing(&LogConfig::from_env());

    let config = listener_config()?;
    let rpc_url = env_required("ETH_RPC_URL")?;
    let ws_url = env_opt("ETH_WS_URL");

    let mut source_config = JsonRpcSourceConfig::new(rpc_url);
    if let Some(url) = &ws_url {
        source_config = source_config.ws_url(url);
    }
    let source = Arc::new(JsonRpcSource::new(source_config)?);
    let store = open_store().await?;

    let cancel = CancellationToken::new();
    let mut supervisor = ListenerBuilder::from_config(config)
        // Without a WebSocket endpoint there is nothing to resubscribe to.
        .resubscribe(ws_url.is_some())
        .source(source)
        .store(store.clone())
        .checkpoints(store)
        .cancel_token(cancel.clone())
        .build()?;
    let handle = supervisor.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            cancel.cancel();
        }
    });

    let result = supervisor.run().await;
    let metrics = handle.metrics();
    match &result {
        Ok(()) => info!(?metrics, "listener finished"),
        Err(e) => error!(error = %e, ?metrics, "listener failed"),
    }
    result?;
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let defaults = ListenerConfig::default();
    let chain = env_opt("CHAIN").unwrap_or(defaults.chain);
    let id = env_opt("INDEXER_ID").unwrap_or(defaults.id);

    let store = open_store().await?;
    let checkpoint = store.load(&chain, &id).await?;
    let counts = store.counts().await?;
    let last_block = store.last_applied_block().await?;

    let status = json!({
        "chain": chain,
        "indexer_id": id,
        "checkpoint": checkpoint,
        "last_applied_block": last_block,
        "counts": counts,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_auction(args: &[String]) -> Result<()> {
    let Some(raw) = args.first() else {
        bail!("usage: auctionindex auction <ID>");
    };
    let auction_id: u64 = raw
        .parse()
        .with_context(|| format!("invalid auction id: {raw}"))?;

    let store = open_store().await?;
    let Some(auction) = store.auction(auction_id).await? else {
        bail!("auction {auction_id} not found");
    };
    let bids = store.bids_for_auction(auction_id).await?;

    let out = json!({ "auction": auction, "bids": bids });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_unreconciled() -> Result<()> {
    let store = open_store().await?;
    let events = store.unreconciled().await?;
    if events.is_empty() {
        eprintln!("no unreconciled events");
    }
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn cmd_info() {
    let defaults = ListenerConfig::default();
    let retry = RetryConfig::default();
    println!("AuctionIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Events: AuctionCreated, BidPlaced, AuctionEnded");
    println!("  Default batch size: {} blocks/call", defaults.batch_size);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!(
        "  Parent retry: {} attempts, {}-{} ms backoff",
        retry.max_retries, retry.initial_backoff_ms, retry.max_backoff_ms
    );
    println!("  Bid policy: trust contract (REQUIRE_INCREASING_BIDS=1 to enforce)");
    println!("  Native token placeholder: {ZERO_ADDRESS}");
    println!("  Storage: SQLite ({DEFAULT_DATABASE})");
}
