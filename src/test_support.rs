// =============================================================================
// Test doubles for the engine's collaborators
// =============================================================================
//
// Compiled only for test builds (see the cfg'd module declaration in main.rs).
// The mock broker is scriptable per placement so partial-open and rejection
// paths can be exercised deterministically.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::broker::{BrokerClient, OrderRequest};
use crate::error::BrokerError;
use crate::feed::PriceFeed;
use crate::notify::Notifier;
use crate::types::Trade;

// ---------------------------------------------------------------------------
// MockBroker
// ---------------------------------------------------------------------------

pub struct MockBroker {
    balance: RwLock<f64>,
    fail_balance: AtomicBool,
    fail_close: AtomicBool,
    next_ticket: AtomicU64,
    place_script: Mutex<VecDeque<Result<u64, BrokerError>>>,
    placed: Mutex<Vec<OrderRequest>>,
    closed: Mutex<Vec<(u64, f64)>>,
    open_orders: RwLock<Vec<Trade>>,
}

impl MockBroker {
    pub fn new(balance: f64) -> Self {
        Self {
            balance: RwLock::new(balance),
            fail_balance: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            next_ticket: AtomicU64::new(500_000),
            place_script: Mutex::new(VecDeque::new()),
            placed: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            open_orders: RwLock::new(Vec::new()),
        }
    }

    /// Queue the outcome of the next placement; unscripted placements succeed
    /// with sequential tickets.
    pub fn script_place(&self, outcome: Result<u64, BrokerError>) {
        self.place_script.lock().push_back(outcome);
    }

    pub fn set_fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn set_open_orders(&self, trades: Vec<Trade>) {
        *self.open_orders.write() = trades;
    }

    /// Every placement attempt, in order.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    /// Every successful close as `(ticket, price)`, in order.
    pub fn closed(&self) -> Vec<(u64, f64)> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn get_price(&self, _symbol: &str) -> Result<f64, BrokerError> {
        Ok(0.0)
    }

    async fn get_balance(&self) -> Result<f64, BrokerError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(BrokerError::Transient("balance request timed out".into()));
        }
        Ok(*self.balance.read())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<u64, BrokerError> {
        self.placed.lock().push(request.clone());
        match self.place_script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.next_ticket.fetch_add(1, Ordering::SeqCst)),
        }
    }

    async fn close_order(&self, order_id: u64, price: f64) -> Result<(), BrokerError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(BrokerError::Transient("close request timed out".into()));
        }
        self.closed.lock().push((order_id, price));
        Ok(())
    }

    async fn get_open_orders(&self) -> Result<Vec<Trade>, BrokerError> {
        Ok(self.open_orders.read().clone())
    }
}

// ---------------------------------------------------------------------------
// StaticFeed
// ---------------------------------------------------------------------------

pub struct StaticFeed {
    prices: RwLock<HashMap<String, f64>>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_string(), price);
    }
}

impl PriceFeed for StaticFeed {
    fn get_price(&self, symbol: &str) -> f64 {
        self.prices.read().get(symbol).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}
