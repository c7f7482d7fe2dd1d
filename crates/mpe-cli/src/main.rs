//! MPE demo - connect to the hub, subscribe to feeds, print events.

use anyhow::Result;
use clap::Parser;
use mpe_client::{MarketClient, MarketEvent};
use mpe_signalr::{Credentials, StaticChallengeSolver};
use std::sync::Arc;
use tracing::{info, warn};

mod config;
use config::CliConfig;

/// MPE market-data feed demo
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MPE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Pairs to subscribe to, overriding the config file
    #[arg(short, long)]
    pairs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS crypto provider must be installed before any socket is opened.
    mpe_signalr::init_crypto();

    let args = Args::parse();
    mpe_telemetry::init_logging()?;

    info!("Starting MPE demo v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("MPE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "Loading configuration");

    let mut config = CliConfig::load(&config_path)?;
    if !args.pairs.is_empty() {
        config.pairs = args.pairs;
    }

    let solver = Arc::new(StaticChallengeSolver::new(Credentials::new(
        &config.cookie,
        &config.user_agent,
    )));
    let (client, mut events) = MarketClient::start(config.client.clone(), solver).await?;

    if !config.pairs.is_empty() {
        client.subscribe_to_markets(config.pairs.clone(), false);
    }
    if !config.tickers.is_empty() {
        client.subscribe_to_tickers(config.tickers.clone(), false);
    }
    if config.summary {
        client.subscribe_to_summary();
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(event),
                None => {
                    warn!("event stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                client.disconnect();
                break;
            }
        }
    }

    // Deliver whatever the driver still had queued before exiting.
    while let Some(event) = events.recv().await {
        print_event(event);
    }

    Ok(())
}

fn print_event(event: MarketEvent) {
    match event {
        MarketEvent::Connected { connection_id } => {
            info!(%connection_id, "connected");
        }
        MarketEvent::Disconnected {
            connection_id,
            code,
            reason,
        } => {
            warn!(%connection_id, code, %reason, "disconnected");
        }
        MarketEvent::ConnectionError {
            step,
            attempts,
            retry,
            error,
        } => {
            warn!(step = %step, attempts, retry, error = %error, "connection error");
        }
        MarketEvent::OrderBook {
            pair,
            cseq,
            bids,
            asks,
        } => {
            info!(%pair, cseq, bids = bids.len(), asks = asks.len(), "order book snapshot");
        }
        MarketEvent::OrderBookUpdate {
            pair,
            cseq,
            bids,
            asks,
        } => {
            info!(%pair, cseq, bids = bids.len(), asks = asks.len(), "order book update");
        }
        MarketEvent::Trades { pair, data } => {
            info!(%pair, trades = data.len(), "trades");
        }
        MarketEvent::Ticker { pair, data } => {
            info!(%pair, last = %data.last, "ticker");
        }
        MarketEvent::Summary { data } => {
            info!(markets = data.len(), "summary");
        }
        MarketEvent::Raw { method, .. } => {
            info!(%method, "raw hub event");
        }
    }
}
