// =============================================================================
// Bridge REST API Client — HMAC-SHA256 signed requests to the broker bridge
// =============================================================================
//
// The bridge is a thin HTTP gateway in front of the trading terminal. All
// mutating endpoints require a signed query: the secret key never leaves this
// struct and is never logged or serialized. recvWindow tolerates minor clock
// drift between the bot and the bridge host.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::broker::{BrokerClient, OrderRequest};
use crate::error::BrokerError;
use crate::types::{Direction, OrderKind, Trade, TradeState};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// REST client for the broker bridge with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BridgeClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BridgeClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BridgeClient`.
    ///
    /// # Arguments
    /// * `base_url` — bridge endpoint, e.g. "https://bridge.example.com".
    /// * `api_key`  — sent as the X-VTX-APIKEY header, never in query params.
    /// * `secret`   — used exclusively for HMAC signing.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-VTX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Issue a request and classify failures into the broker error kinds.
    ///
    /// Connection errors and timeouts are transient; an error body with a
    /// permanent bridge code is a rejection.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<serde_json::Value, BrokerError> {
        let resp = request
            .send()
            .await
            .map_err(|e| BrokerError::Transient(format!("{what} request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::Transient(format!("{what} response unreadable: {e}")))?;

        if !status.is_success() {
            let code = body["code"].as_i64().unwrap_or(-1);
            let reason = body["message"]
                .as_str()
                .unwrap_or("no message")
                .to_string();
            // 5xx means the bridge itself is struggling; retry later.
            if status.is_server_error() {
                return Err(BrokerError::Transient(format!(
                    "{what} returned {status}: {reason}"
                )));
            }
            return Err(BrokerError::Rejected { code, reason });
        }

        Ok(body)
    }
}

#[async_trait]
impl BrokerClient for BridgeClient {
    /// GET /api/v1/quote (public).
    #[instrument(skip(self), name = "bridge::get_price")]
    async fn get_price(&self, symbol: &str) -> Result<f64, BrokerError> {
        let url = format!("{}/api/v1/quote?symbol={symbol}", self.base_url);
        let body = self.send(self.client.get(&url), "GET /api/v1/quote").await?;

        let price = parse_str_f64(&body["price"]).unwrap_or(0.0);
        if price <= 0.0 {
            warn!(symbol, "bridge returned no usable price");
        }
        debug!(symbol, price, "quote retrieved");
        Ok(price)
    }

    /// GET /api/v1/account (signed).
    #[instrument(skip(self), name = "bridge::get_balance")]
    async fn get_balance(&self) -> Result<f64, BrokerError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v1/account?{}", self.base_url, qs);
        let body = self
            .send(self.client.get(&url), "GET /api/v1/account")
            .await?;

        let balance = parse_str_f64(&body["balance"])
            .map_err(|e| BrokerError::Transient(format!("account balance unreadable: {e}")))?;
        debug!(balance, "account balance retrieved");
        Ok(balance)
    }

    /// POST /api/v1/order (signed) — submit a new order.
    #[instrument(skip(self, request), name = "bridge::place_order")]
    async fn place_order(&self, request: &OrderRequest) -> Result<u64, BrokerError> {
        let params = format!(
            "symbol={}&side={}&lot={}&price={}&sl={}&tp={}&comment={}",
            request.symbol,
            request.direction,
            request.lot,
            request.price,
            request.sl,
            request.tp,
            request.comment
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v1/order?{}", self.base_url, qs);

        debug!(
            symbol = %request.symbol,
            side = %request.direction,
            lot = request.lot,
            "placing order via bridge"
        );

        let body = self
            .send(self.client.post(&url), "POST /api/v1/order")
            .await?;

        let ticket = body["ticket"]
            .as_u64()
            .ok_or_else(|| BrokerError::Transient("order response missing ticket".into()))?;

        debug!(symbol = %request.symbol, ticket, "order placed");
        Ok(ticket)
    }

    /// POST /api/v1/close (signed) — close an open order.
    #[instrument(skip(self), name = "bridge::close_order")]
    async fn close_order(&self, order_id: u64, price: f64) -> Result<(), BrokerError> {
        let params = format!("ticket={order_id}&price={price}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v1/close?{}", self.base_url, qs);

        self.send(self.client.post(&url), "POST /api/v1/close")
            .await?;

        debug!(order_id, price, "order closed");
        Ok(())
    }

    /// GET /api/v1/orders/open (signed).
    #[instrument(skip(self), name = "bridge::get_open_orders")]
    async fn get_open_orders(&self) -> Result<Vec<Trade>, BrokerError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v1/orders/open?{}", self.base_url, qs);
        let body = self
            .send(self.client.get(&url), "GET /api/v1/orders/open")
            .await?;

        let raw = body
            .as_array()
            .cloned()
            .or_else(|| body["orders"].as_array().cloned())
            .unwrap_or_default();

        let mut trades = Vec::with_capacity(raw.len());
        for entry in &raw {
            match parse_open_order(entry) {
                Ok(trade) => trades.push(trade),
                Err(e) => warn!(error = %e, "skipping malformed open order entry"),
            }
        }

        debug!(count = trades.len(), "open orders retrieved");
        Ok(trades)
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

/// Map one bridge open-order entry to an untagged `Trade`.
fn parse_open_order(entry: &serde_json::Value) -> Result<Trade> {
    let ticket = entry["ticket"]
        .as_u64()
        .context("open order missing ticket")?;
    let symbol = entry["symbol"]
        .as_str()
        .context("open order missing symbol")?
        .to_string();
    let direction = match entry["side"].as_str().context("open order missing side")? {
        "buy" => Direction::Buy,
        "sell" => Direction::Sell,
        other => anyhow::bail!("unknown order side '{other}'"),
    };

    Ok(Trade {
        order_id: Some(ticket),
        symbol,
        direction,
        entry: parse_str_f64(&entry["entry"])?,
        sl: parse_str_f64(&entry["sl"]).unwrap_or(0.0),
        tp: parse_str_f64(&entry["tp"]).unwrap_or(0.0),
        lot: parse_str_f64(&entry["lot"])?,
        strategy: entry["comment"].as_str().unwrap_or("").to_string(),
        kind: OrderKind::ProfitTrail,
        chain_id: None,
        chain_level: 0,
        state: TradeState::Open,
        opened_at: entry["opened_at"].as_str().unwrap_or("").to_string(),
        closed_at: None,
        close_reason: None,
        realized_pnl: 0.0,
    })
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = BridgeClient::new("https://bridge.test", "key", "secret");
        let a = client.sign("symbol=XAUUSD&lot=0.05");
        let b = client.sign("symbol=XAUUSD&lot=0.05");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parse_open_order_maps_fields() {
        let entry = serde_json::json!({
            "ticket": 445566,
            "symbol": "XAUUSD",
            "side": "sell",
            "entry": "1999.5",
            "sl": 2007.0,
            "tp": 1992.0,
            "lot": "0.1",
            "comment": "LOGIC1_PROFIT_L1",
            "opened_at": "2026-03-02T09:00:00Z"
        });
        let trade = parse_open_order(&entry).unwrap();
        assert_eq!(trade.order_id, Some(445566));
        assert_eq!(trade.direction, Direction::Sell);
        assert!((trade.entry - 1999.5).abs() < 1e-12);
        assert!((trade.lot - 0.1).abs() < 1e-12);
        assert!(trade.chain_id.is_none());
        assert!(trade.is_open());
    }

    #[test]
    fn parse_open_order_rejects_missing_ticket() {
        let entry = serde_json::json!({ "symbol": "XAUUSD", "side": "buy" });
        assert!(parse_open_order(&entry).is_err());
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = BridgeClient::new("https://bridge.test", "topsecretkey", "topsecret");
        let dump = format!("{client:?}");
        assert!(!dump.contains("topsecret"));
        assert!(dump.contains("<redacted>"));
    }
}
