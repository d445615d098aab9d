// =============================================================================
// Simulated Broker — synthetic fills for demo and test runs
// =============================================================================
//
// Selected at wiring time when `simulate_orders` is on; the engine itself
// never branches on simulation. Tickets are drawn uniformly from
// [100000, 999999], matching the live bridge's ticket width.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, OrderRequest};
use crate::error::BrokerError;
use crate::types::{OrderKind, Trade, TradeState};

const TICKET_MIN: u64 = 100_000;
const TICKET_MAX: u64 = 999_999;

/// In-process broker: keeps its own open-order table and a settable price
/// board.
pub struct SimBroker {
    balance: RwLock<f64>,
    prices: RwLock<HashMap<String, f64>>,
    open: RwLock<HashMap<u64, Trade>>,
}

impl SimBroker {
    pub fn new(balance: f64) -> Self {
        info!(balance, "simulated broker initialised");
        Self {
            balance: RwLock::new(balance),
            prices: RwLock::new(HashMap::new()),
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a price onto the simulator's board.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, balance: f64) {
        *self.balance.write() = balance;
    }

    fn next_ticket(&self) -> u64 {
        let open = self.open.read();
        let mut rng = rand::thread_rng();
        loop {
            let ticket = rng.gen_range(TICKET_MIN..=TICKET_MAX);
            if !open.contains_key(&ticket) {
                return ticket;
            }
        }
    }
}

#[async_trait]
impl BrokerClient for SimBroker {
    async fn get_price(&self, symbol: &str) -> Result<f64, BrokerError> {
        Ok(self.prices.read().get(symbol).copied().unwrap_or(0.0))
    }

    async fn get_balance(&self) -> Result<f64, BrokerError> {
        Ok(*self.balance.read())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<u64, BrokerError> {
        let ticket = self.next_ticket();

        let trade = Trade {
            order_id: Some(ticket),
            symbol: request.symbol.clone(),
            direction: request.direction,
            entry: request.price,
            sl: request.sl,
            tp: request.tp,
            lot: request.lot,
            strategy: request.comment.clone(),
            kind: OrderKind::ProfitTrail,
            chain_id: None,
            chain_level: 0,
            state: TradeState::Open,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
        };
        self.open.write().insert(ticket, trade);

        info!(
            ticket,
            symbol = %request.symbol,
            side = %request.direction,
            lot = request.lot,
            price = request.price,
            "simulated fill"
        );
        Ok(ticket)
    }

    async fn close_order(&self, order_id: u64, price: f64) -> Result<(), BrokerError> {
        match self.open.write().remove(&order_id) {
            Some(_) => {
                debug!(order_id, price, "simulated close");
                Ok(())
            }
            None => {
                warn!(order_id, "simulated close for unknown ticket");
                Err(BrokerError::Rejected {
                    code: 404,
                    reason: format!("unknown ticket {order_id}"),
                })
            }
        }
    }

    async fn get_open_orders(&self) -> Result<Vec<Trade>, BrokerError> {
        Ok(self.open.read().values().cloned().collect())
    }
}

impl std::fmt::Debug for SimBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBroker")
            .field("balance", &*self.balance.read())
            .field("open_orders", &self.open.read().len())
            .finish()
    }
}
