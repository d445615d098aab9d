// =============================================================================
// Price feed — cached last-known prices fed by the websocket tick stream
// =============================================================================

pub mod stream;

use std::collections::HashMap;

use parking_lot::RwLock;

pub use stream::run_tick_stream;

/// Read side of the price feed. 0.0 means no usable price; callers must not
/// act on it.
pub trait PriceFeed: Send + Sync {
    fn get_price(&self, symbol: &str) -> f64;
}

/// Shared price board: one slot per symbol, overwritten by every tick.
pub struct PriceBoard {
    prices: RwLock<HashMap<String, f64>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn update(&self, symbol: &str, price: f64) {
        if price > 0.0 {
            self.prices.write().insert(symbol.to_string(), price);
        }
    }
}

impl Default for PriceBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceFeed for PriceBoard {
    fn get_price(&self, symbol: &str) -> f64 {
        self.prices.read().get(symbol).copied().unwrap_or(0.0)
    }
}

impl std::fmt::Debug for PriceBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceBoard")
            .field("symbols", &self.prices.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_symbol_reads_as_unavailable() {
        let board = PriceBoard::new();
        assert_eq!(board.get_price("XAUUSD"), 0.0);
    }

    #[test]
    fn updates_overwrite_the_slot() {
        let board = PriceBoard::new();
        board.update("XAUUSD", 2000.5);
        board.update("XAUUSD", 2001.0);
        assert!((board.get_price("XAUUSD") - 2001.0).abs() < 1e-12);
    }

    #[test]
    fn non_positive_prices_are_ignored() {
        let board = PriceBoard::new();
        board.update("XAUUSD", 2000.5);
        board.update("XAUUSD", 0.0);
        board.update("XAUUSD", -3.0);
        assert!((board.get_price("XAUUSD") - 2000.5).abs() < 1e-12);
    }
}
