//! # cbx-runner
//!
//! Follows one or more products on the exchange feed and logs their live
//! candles.
//!
//! Loads a JSON configuration file, seeds each product's series from REST
//! history, streams trades over one shared WebSocket connection and keeps
//! aggregating until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cbx-runner config.json --log-level info --log-format json --product BTC-USD --granularity 5m
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cbx_api::{HistoryClient, Signer, SubscriptionBuilder};
use cbx_core::Granularity;
use cbx_core::logging::LogFormat;
use cbx_core::ws::{ConnectionRegistry, TungsteniteConnector};
use cbx_md::{CandleFeed, CandleUpdate, CandleUpdateReceiver, SessionSettings};
use clap::Parser;
use tracing::{debug, error, info, warn};

/// Live candle feed runner.
#[derive(Parser)]
#[command(name = "cbx-runner", about = "Live candle feed runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `Feed.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Log line format, `text` or `json`. Overrides `Feed.log_format`.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Product to follow; repeat for several. Replaces the configured list.
    #[arg(short, long = "product")]
    products: Vec<String>,

    /// Candle width, as a label (`5m`) or seconds (`300`).
    #[arg(short, long)]
    granularity: Option<Granularity>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (CLI overrides on top)
    let mut config = cbx_core::config::read_config(&cli.config)?;
    if !cli.products.is_empty() {
        config.products = cli.products.clone();
    }
    if let Some(granularity) = cli.granularity {
        config.granularity = granularity;
    }
    config.validate()?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let log_format = cli.log_format.unwrap_or_else(|| config.log_format());
    cbx_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name(), log_format)?;

    info!(
        "cbx-runner starting: config={}, products={:?}, granularity={}",
        cli.config.display(),
        config.products,
        config.granularity,
    );

    // 3. Shared plumbing
    let credential = Arc::new(config.effective_credential());
    if !credential.has_api_key() {
        warn!("no API key configured; subscribing unauthenticated");
    }
    let signer = Signer::new(credential);
    let builder = SubscriptionBuilder::new(signer.clone());
    let history = HistoryClient::new(config.rest_url.clone(), signer).context("creating history client")?;
    let registry = ConnectionRegistry::new(Arc::new(TungsteniteConnector), config.connect_timeout());

    // 4. One feed per product, all on the same connection
    let mut feeds = Vec::with_capacity(config.products.len());
    let mut printers = Vec::with_capacity(config.products.len());
    for product in &config.products {
        let (feed, updates) = CandleFeed::start(
            SessionSettings::from_config(&config, product),
            config.granularity,
            registry.clone(),
            builder.clone(),
            config.retry.clone(),
        );

        if config.seed_history {
            match history.fetch_seed(product, config.granularity, chrono::Utc::now()).await {
                Ok(candles) => feed.seed(candles),
                Err(e) => warn!("[feed {}] history unavailable, starting empty: {e:#}", feed.label()),
            }
        }

        printers.push(tokio::spawn(log_updates(feed.label().to_owned(), updates)));
        feeds.push(feed);
    }

    info!("{} feed(s) started; press Ctrl+C to stop", feeds.len());

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Stop feeds, then the connections
    for feed in &feeds {
        feed.stop().await;
        info!("[feed {}] {} candles, {} late trades", feed.label(), feed.series().len(), feed.late_count());
    }
    registry.shutdown().await;
    for printer in printers {
        if let Err(e) = printer.await {
            error!("update logger failed: {e}");
        }
    }

    info!("all feeds stopped");
    Ok(())
}

async fn log_updates(label: String, mut updates: CandleUpdateReceiver) {
    while let Some(update) = updates.recv().await {
        match update {
            CandleUpdate::Opened(c) => info!(
                "[feed {label}] new candle t={} o={} h={} l={} c={} v={}",
                c.time, c.open, c.high, c.low, c.close, c.volume
            ),
            CandleUpdate::Updated(c) => debug!(
                "[feed {label}] candle t={} o={} h={} l={} c={} v={}",
                c.time, c.open, c.high, c.low, c.close, c.volume
            ),
            CandleUpdate::Late { bucket, last_bucket } => {
                debug!("[feed {label}] late trade for {bucket} (last {last_bucket})")
            }
        }
    }
}
