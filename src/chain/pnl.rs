// =============================================================================
// Cohort PnL — combined unrealised profit of a chain's current level
// =============================================================================
//
// A pure snapshot: the only I/O is the single price read through the feed.
// A price of 0 means unavailable and yields 0; callers never act on a zero
// result because profit targets are strictly positive.
// =============================================================================

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::chain::state::Chain;
use crate::config::SymbolConfig;
use crate::feed::PriceFeed;
use crate::types::{Direction, Trade};

/// Unrealised dollars of a single open trade at `price`.
pub fn trade_pnl(trade: &Trade, price: f64, symbol_cfg: &SymbolConfig) -> f64 {
    let price_diff = match trade.direction {
        Direction::Buy => price - trade.entry,
        Direction::Sell => trade.entry - price,
    };
    let pips_moved = price_diff / symbol_cfg.pip_size;
    pips_moved * symbol_cfg.pip_value_per_std_lot * trade.lot
}

/// Combined unrealised dollars of the chain's current-level cohort.
pub fn cohort_pnl(
    chain: &Chain,
    open_trades: &[Trade],
    feed: &dyn PriceFeed,
    symbols: &HashMap<String, SymbolConfig>,
) -> f64 {
    let cohort: Vec<&Trade> = open_trades
        .iter()
        .filter(|t| {
            t.chain_id.as_deref() == Some(chain.chain_id.as_str())
                && t.chain_level == chain.current_level
                && t.is_open()
        })
        .collect();

    if cohort.is_empty() {
        return 0.0;
    }

    let price = feed.get_price(&chain.symbol);
    if price <= 0.0 {
        debug!(chain_id = %chain.chain_id, symbol = %chain.symbol, "price unavailable, pnl is 0");
        return 0.0;
    }

    let mut total = 0.0;
    for trade in cohort {
        let Some(symbol_cfg) = symbols.get(&trade.symbol) else {
            warn!(symbol = %trade.symbol, "no symbol config, trade excluded from cohort pnl");
            continue;
        };
        total += trade_pnl(trade, price, symbol_cfg);
    }

    total
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::state::Schedule;
    use crate::config::ProfitBookingConfig;
    use crate::feed::PriceBoard;
    use crate::types::{OrderKind, TradeState, Volatility};

    fn xauusd_symbols() -> HashMap<String, SymbolConfig> {
        let mut map = HashMap::new();
        map.insert(
            "XAUUSD".to_string(),
            SymbolConfig {
                pip_size: 0.1,
                pip_value_per_std_lot: 10.0,
                volatility: Volatility::Medium,
            },
        );
        map
    }

    fn trade(order_id: u64, direction: Direction, entry: f64, lot: f64, level: u32) -> Trade {
        Trade {
            order_id: Some(order_id),
            symbol: "XAUUSD".to_string(),
            direction,
            entry,
            sl: 0.0,
            tp: 0.0,
            lot,
            strategy: "LOGIC1".to_string(),
            kind: OrderKind::ProfitTrail,
            chain_id: Some("PROFIT_XAUUSD_aaaaaaaa".to_string()),
            chain_level: level,
            state: TradeState::Open,
            opened_at: chrono::Utc::now().to_rfc3339(),
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
        }
    }

    fn chain_at(level: u32) -> Chain {
        let mut chain = Chain::from_seed(
            "PROFIT_XAUUSD_aaaaaaaa".to_string(),
            &trade(1, Direction::Buy, 2000.0, 0.05, 0),
            4,
            Schedule::from_config(&ProfitBookingConfig::default()),
        );
        chain.current_level = level;
        chain
    }

    #[test]
    fn twenty_pips_on_a_nickel_lot_is_ten_dollars() {
        // 2002.0 - 2000.0 = 20 pips on XAUUSD; 20 * $10 * 0.05 = $10.
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 2002.0);
        let trades = vec![trade(1, Direction::Buy, 2000.0, 0.05, 0)];

        let pnl = cohort_pnl(&chain_at(0), &trades, &feed, &xauusd_symbols());
        assert!((pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn nineteen_pips_stays_short_of_the_first_target() {
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 2001.9);
        let trades = vec![trade(1, Direction::Buy, 2000.0, 0.05, 0)];

        let pnl = cohort_pnl(&chain_at(0), &trades, &feed, &xauusd_symbols());
        assert!((pnl - 9.5).abs() < 1e-9);
    }

    #[test]
    fn sell_direction_inverts_the_sign() {
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 1998.0);
        let trades = vec![trade(1, Direction::Sell, 2000.0, 0.1, 0)];

        // entry - current = 2.0 -> 20 pips * $10 * 0.1 = $20.
        let pnl = cohort_pnl(&chain_at(0), &trades, &feed, &xauusd_symbols());
        assert!((pnl - 20.0).abs() < 1e-9);
    }

    #[test]
    fn cohort_sums_across_orders_at_the_same_level() {
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 2001.0);
        let trades = vec![
            trade(1, Direction::Buy, 2000.0, 0.05, 1),
            trade(2, Direction::Buy, 2000.0, 0.05, 1),
        ];

        // Each trade: 10 pips * $10 * 0.05 = $5.
        let pnl = cohort_pnl(&chain_at(1), &trades, &feed, &xauusd_symbols());
        assert!((pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn other_levels_and_chains_are_excluded() {
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 2001.0);

        let mut foreign = trade(3, Direction::Buy, 2000.0, 0.05, 0);
        foreign.chain_id = Some("PROFIT_XAUUSD_bbbbbbbb".to_string());

        let mut closed = trade(4, Direction::Buy, 2000.0, 0.05, 0);
        closed.state = TradeState::Closed;

        let trades = vec![
            trade(1, Direction::Buy, 2000.0, 0.05, 0),
            trade(2, Direction::Buy, 2000.0, 0.05, 1), // stale level
            foreign,
            closed,
        ];

        let pnl = cohort_pnl(&chain_at(0), &trades, &feed, &xauusd_symbols());
        assert!((pnl - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_cohort_reads_zero() {
        let feed = PriceBoard::new();
        feed.update("XAUUSD", 2050.0);
        let pnl = cohort_pnl(&chain_at(0), &[], &feed, &xauusd_symbols());
        assert_eq!(pnl, 0.0);
    }

    #[test]
    fn unavailable_price_reads_zero_even_in_profit() {
        // No price published at all: the stale entry price must not be used.
        let feed = PriceBoard::new();
        let trades = vec![trade(1, Direction::Buy, 2000.0, 0.05, 0)];
        let pnl = cohort_pnl(&chain_at(0), &trades, &feed, &xauusd_symbols());
        assert_eq!(pnl, 0.0);
    }
}
