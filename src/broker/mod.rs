// =============================================================================
// Broker abstraction — one trait, two implementations
// =============================================================================
//
// The engine talks to the broker only through `BrokerClient`; whether orders
// hit the live bridge or the simulator is decided once, at wiring time.
// =============================================================================

pub mod bridge;
pub mod sim;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::types::{Direction, Trade};

pub use bridge::BridgeClient;
pub use sim::SimBroker;

/// Everything the engine needs to place one order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub lot: f64,
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    /// Free-form broker comment, e.g. "LOGIC1_PROFIT_L2".
    pub comment: String,
}

/// Async broker contract. Implementations must be safe to share across tasks.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Current price for `symbol`; 0.0 means unavailable.
    async fn get_price(&self, symbol: &str) -> Result<f64, BrokerError>;

    /// Free account balance in account currency.
    async fn get_balance(&self) -> Result<f64, BrokerError>;

    /// Submit an order; returns the broker ticket.
    async fn place_order(&self, request: &OrderRequest) -> Result<u64, BrokerError>;

    /// Close an open order at `price`.
    async fn close_order(&self, order_id: u64, price: f64) -> Result<(), BrokerError>;

    /// All currently open orders, as untagged trades (chain membership is
    /// rebuilt from the chain store, not from the broker).
    async fn get_open_orders(&self) -> Result<Vec<Trade>, BrokerError>;
}
