// =============================================================================
// Tick Stream — websocket price subscription feeding the price board
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::feed::PriceBoard;

/// Connect to the bridge tick websocket for a single symbol and feed mid
/// prices into `board`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_tick_stream(ws_base: &str, symbol: &str, board: &Arc<PriceBoard>) -> Result<()> {
    let url = format!("{ws_base}/ticks/{}", symbol.to_lowercase());
    info!(url = %url, symbol = %symbol, "connecting to tick WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to tick WebSocket")?;

    info!(symbol = %symbol, "tick WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_tick(&text) {
                        Ok(mid) => board.update(symbol, mid),
                        Err(e) => {
                            warn!(error = %e, "failed to parse tick message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "tick WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "tick WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a bridge tick message into a mid price.
///
/// Expected shape:
/// ```json
/// { "e": "tick", "s": "XAUUSD", "b": "2000.10", "a": "2000.30" }
/// ```
fn parse_tick(text: &str) -> Result<f64> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse tick JSON")?;

    let bid: f64 = root["b"]
        .as_str()
        .context("missing field b")?
        .parse()
        .context("failed to parse bid")?;

    let ask: f64 = root["a"]
        .as_str()
        .context("missing field a")?
        .parse()
        .context("failed to parse ask")?;

    if bid <= 0.0 || ask <= 0.0 {
        anyhow::bail!("non-positive quote: bid={bid} ask={ask}");
    }

    Ok((bid + ask) / 2.0)
}
