// =============================================================================
// Shared types used across the Vertex trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction as the broker understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// What kind of order a trade originated from.
///
/// Only `ProfitTrail` seeds a profit-booking chain; the other kinds pass
/// through the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    ProfitTrail,
    Market,
}

impl Default for OrderKind {
    fn default() -> Self {
        Self::Market
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfitTrail => write!(f, "PROFIT_TRAIL"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// Volatility class of an instrument, from symbol configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Volatility {
    Low,
    Medium,
    High,
}

impl Default for Volatility {
    fn default() -> Self {
        Self::Medium
    }
}

/// Open/closed state of a tracked trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeState {
    Open,
    Closed,
}

/// A single tracked trade (one broker ticket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Broker ticket, assigned on placement. `None` until the order is live.
    #[serde(default)]
    pub order_id: Option<u64>,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub lot: f64,
    /// Strategy tag carried from the originating signal.
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub kind: OrderKind,
    /// Chain membership tag. Cleared when the trade is orphaned.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Chain level this trade was placed at. Meaningless without `chain_id`.
    #[serde(default)]
    pub chain_level: u32,
    pub state: TradeState,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub realized_pnl: f64,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.state == TradeState::Open
    }
}
