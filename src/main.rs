// =============================================================================
// Vertex Pyramid Engine — Main Entry Point
// =============================================================================
//
// Wires the chain engine to its collaborators and runs the monitor loop.
// Chains are seeded by the upstream alert gateway through the engine API;
// this binary recovers persisted chains against live broker state on startup
// and keeps them progressing until shutdown.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod chain;
mod config;
mod error;
mod feed;
mod notify;
mod pip;
mod risk;
#[cfg(test)]
mod test_support;
mod trade_book;
mod types;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::{BridgeClient, BrokerClient, SimBroker};
use crate::chain::monitor::run_chain_monitor;
use crate::chain::recovery::recover_chains;
use crate::chain::{ChainEngine, JsonChainStore};
use crate::config::BotConfig;
use crate::feed::{run_tick_stream, PriceBoard, PriceFeed};
use crate::notify::{Notifier, NullNotifier, TelegramNotifier};
use crate::risk::RiskLedger;
use crate::trade_book::TradeBook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Vertex Pyramid Engine — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = BotConfig::load("config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let defaults = BotConfig::default();
        // Leave a template behind so the operator has something to edit.
        if !std::path::Path::new("config.json").exists() {
            if let Err(e) = defaults.save("config.json") {
                warn!(error = %e, "Failed to write default config template");
            }
        }
        defaults
    });
    let config = Arc::new(config);

    info!(
        symbols = ?config.symbol_config.keys().collect::<Vec<_>>(),
        simulate_orders = config.simulate_orders,
        max_level = config.profit_booking_config.max_level,
        "Configured"
    );

    // ── 2. Persistence ───────────────────────────────────────────────────
    let data_dir = std::path::PathBuf::from(&config.data_dir);
    let store = Arc::new(JsonChainStore::open(&data_dir)?);
    let ledger = Arc::new(RiskLedger::load(data_dir.join("stats.json")));

    // ── 3. Broker client ─────────────────────────────────────────────────
    let broker: Arc<dyn BrokerClient> = if config.simulate_orders {
        warn!("simulate_orders is ON — orders will never reach the broker");
        Arc::new(SimBroker::new(config.sim_balance))
    } else {
        let base_url = std::env::var("BRIDGE_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8383".to_string());
        let api_key = std::env::var("BRIDGE_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BRIDGE_API_SECRET").unwrap_or_default();
        Arc::new(BridgeClient::new(base_url, api_key, api_secret))
    };

    // ── 4. Price feed ────────────────────────────────────────────────────
    let board = Arc::new(PriceBoard::new());
    let ws_base =
        std::env::var("FEED_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8384".to_string());

    for symbol in config.symbol_config.keys() {
        let board_task = board.clone();
        let sym = symbol.clone();
        let ws = ws_base.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = run_tick_stream(&ws, &sym, &board_task).await {
                    error!(symbol = %sym, error = %e, "Tick stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }
    info!(count = config.symbol_config.len(), "Tick streams launched");

    // ── 5. Notifier ──────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match (
        std::env::var("TELEGRAM_BOT_TOKEN"),
        std::env::var("TELEGRAM_CHAT_ID"),
    ) {
        (Ok(token), Ok(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
            Arc::new(TelegramNotifier::new(token, chat_id))
        }
        _ => {
            warn!("Telegram not configured — notifications go to the log only");
            Arc::new(NullNotifier)
        }
    };

    // ── 6. Chain engine ──────────────────────────────────────────────────
    let book = Arc::new(TradeBook::new());
    let feed: Arc<dyn PriceFeed> = board.clone();
    let engine = Arc::new(ChainEngine::new(
        config.clone(),
        store.clone(),
        broker.clone(),
        feed,
        notifier,
        ledger.clone(),
        book.clone(),
    ));

    // ── 7. Startup reconciliation ────────────────────────────────────────
    match recover_chains(&engine, store.as_ref(), broker.as_ref(), &book).await {
        Ok(report) => info!(
            chains = report.chains_recovered,
            orders = report.orders_attached,
            stale = report.stale_level_orders,
            orphans = report.orphans_cleared,
            "Startup reconciliation done"
        ),
        Err(e) => error!(error = %e, "Startup reconciliation failed — engine starts empty"),
    }

    // ── 8. Chain monitor loop ────────────────────────────────────────────
    tokio::spawn(run_chain_monitor(engine.clone()));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Chains and their broker orders are left as-is; the ledger and the chain
    // store persist synchronously, so there is nothing to flush.
    let stats = ledger.snapshot();
    info!(
        open_trades = book.snapshot_open().len(),
        chains = engine.chain_ids().len(),
        daily_profit = stats.daily_profit,
        daily_loss = stats.daily_loss,
        "Vertex Pyramid Engine shut down complete."
    );
    Ok(())
}
