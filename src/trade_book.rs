// =============================================================================
// Trade Book — registry of open and closed trades
// =============================================================================
//
// The book is the engine's in-memory mirror of broker state: every placed
// order lives here as an open Trade until it is closed, at which point it
// moves to the closed list with its close reason and realised PnL. Chain
// membership tags on trades are maintained through the book so orphan
// clearing has a single owner.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::types::{Trade, TradeState};

/// Thread-safe registry that owns the lists of open and closed trades.
pub struct TradeBook {
    open: RwLock<Vec<Trade>>,
    closed: RwLock<Vec<Trade>>,
}

impl TradeBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a newly placed trade as open.
    pub fn add(&self, trade: Trade) {
        info!(
            order_id = ?trade.order_id,
            symbol = %trade.symbol,
            direction = %trade.direction,
            entry = trade.entry,
            lot = trade.lot,
            chain_id = ?trade.chain_id,
            "trade registered"
        );
        self.open.write().push(trade);
    }

    /// Replace the whole open list (startup: broker truth wins).
    pub fn seed_open(&self, trades: Vec<Trade>) {
        info!(count = trades.len(), "trade book seeded from broker state");
        *self.open.write() = trades;
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close an open trade by broker ticket and move it to the closed list.
    ///
    /// `pnl` is the realised dollar result computed by the caller (the book
    /// has no pip math). Returns the closed trade, or `None` if no matching
    /// open trade exists.
    pub fn close(&self, order_id: u64, reason: &str, close_price: f64, pnl: f64) -> Option<Trade> {
        let mut open = self.open.write();
        let idx = open
            .iter()
            .position(|t| t.order_id == Some(order_id) && t.is_open())?;
        let mut trade = open.remove(idx);
        drop(open);

        trade.state = TradeState::Closed;
        trade.closed_at = Some(Utc::now().to_rfc3339());
        trade.close_reason = Some(reason.to_string());
        trade.realized_pnl = pnl;

        info!(
            order_id,
            reason,
            close_price,
            realized_pnl = pnl,
            "trade closed"
        );

        self.closed.write().push(trade.clone());
        Some(trade)
    }

    // -------------------------------------------------------------------------
    // Chain tags
    // -------------------------------------------------------------------------

    /// Stamp an open trade with its chain membership.
    pub fn stamp_chain(&self, order_id: u64, chain_id: &str, level: u32) {
        let mut open = self.open.write();
        if let Some(trade) = open.iter_mut().find(|t| t.order_id == Some(order_id)) {
            trade.chain_id = Some(chain_id.to_string());
            trade.chain_level = level;
        }
    }

    /// Clear the chain tag of an orphaned trade.
    pub fn clear_chain_tag(&self, order_id: u64) {
        let mut open = self.open.write();
        if let Some(trade) = open.iter_mut().find(|t| t.order_id == Some(order_id)) {
            warn!(
                order_id,
                chain_id = ?trade.chain_id,
                "clearing chain tag from orphaned trade"
            );
            trade.chain_id = None;
            trade.chain_level = 0;
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot of all currently open trades.
    pub fn snapshot_open(&self) -> Vec<Trade> {
        self.open.read().clone()
    }

    /// The most recent `count` closed trades (newest first).
    pub fn recent_closed(&self, count: usize) -> Vec<Trade> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl Default for TradeBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TradeBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open_count = self.open.read().len();
        let closed_count = self.closed.read().len();
        f.debug_struct("TradeBook")
            .field("open_trades", &open_count)
            .field("closed_trades", &closed_count)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OrderKind};

    fn trade(order_id: u64) -> Trade {
        Trade {
            order_id: Some(order_id),
            symbol: "XAUUSD".to_string(),
            direction: Direction::Buy,
            entry: 2000.0,
            sl: 1992.5,
            tp: 2007.5,
            lot: 0.05,
            strategy: "LOGIC1".to_string(),
            kind: OrderKind::ProfitTrail,
            chain_id: None,
            chain_level: 0,
            state: TradeState::Open,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
        }
    }

    #[test]
    fn close_moves_trade_to_closed_list() {
        let book = TradeBook::new();
        book.add(trade(101));
        book.add(trade(102));

        let closed = book.close(101, "PROFIT_BOOKING", 2002.0, 10.0).unwrap();
        assert_eq!(closed.state, TradeState::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some("PROFIT_BOOKING"));
        assert!((closed.realized_pnl - 10.0).abs() < 1e-12);

        assert_eq!(book.snapshot_open().len(), 1);
        assert_eq!(book.recent_closed(10).len(), 1);
    }

    #[test]
    fn closing_unknown_ticket_is_none() {
        let book = TradeBook::new();
        book.add(trade(101));
        assert!(book.close(999, "PROFIT_BOOKING", 2002.0, 0.0).is_none());
        assert_eq!(book.snapshot_open().len(), 1);
    }

    #[test]
    fn chain_tags_roundtrip() {
        let book = TradeBook::new();
        book.add(trade(101));

        book.stamp_chain(101, "PROFIT_XAUUSD_deadbeef", 2);
        let open = book.snapshot_open();
        assert_eq!(open[0].chain_id.as_deref(), Some("PROFIT_XAUUSD_deadbeef"));
        assert_eq!(open[0].chain_level, 2);

        book.clear_chain_tag(101);
        let open = book.snapshot_open();
        assert!(open[0].chain_id.is_none());
        assert_eq!(open[0].chain_level, 0);
    }

    #[test]
    fn seed_open_replaces_previous_contents() {
        let book = TradeBook::new();
        book.add(trade(1));
        book.seed_open(vec![trade(7), trade(8)]);
        let ids: Vec<_> = book.snapshot_open().iter().map(|t| t.order_id).collect();
        assert_eq!(ids, vec![Some(7), Some(8)]);
    }
}
