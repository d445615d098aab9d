// =============================================================================
// Pip Calculator — stop-loss and take-profit price math
// =============================================================================
//
// Stop distance starts from a volatility-class pip estimate, is tightened by
// the per-level `sl_adj` factor, and is finally clamped so a single order's
// worst case never risks more than MAX_RISK_FRACTION of the account balance.
// =============================================================================

use crate::config::SymbolConfig;
use crate::types::{Direction, Volatility};

/// Per-order risk ceiling as a fraction of account balance.
const MAX_RISK_FRACTION: f64 = 0.02;

/// Conservative stop-loss distance estimate, in pips, per volatility class.
pub const fn sl_pips_estimate(volatility: Volatility) -> f64 {
    match volatility {
        Volatility::Low => 50.0,
        Volatility::Medium => 75.0,
        Volatility::High => 100.0,
    }
}

/// Compute the stop-loss price and distance for an entry at `price`.
///
/// `sl_adj` is the tightening factor `1 - reduction/100` from the chain
/// schedule; 1.0 means the full volatility-estimated distance.
///
/// Returns `(sl_price, sl_distance)` with the distance in price units.
pub fn stop_loss(
    symbol_cfg: &SymbolConfig,
    price: f64,
    direction: Direction,
    lot: f64,
    balance: f64,
    sl_adj: f64,
) -> (f64, f64) {
    let mut pips = sl_pips_estimate(symbol_cfg.volatility) * sl_adj;

    // Clamp so this order alone cannot lose more than the risk ceiling.
    let pip_value = symbol_cfg.pip_value_per_std_lot * lot;
    if pip_value > 0.0 && balance > 0.0 {
        let max_pips = (balance * MAX_RISK_FRACTION) / pip_value;
        pips = pips.min(max_pips);
    }

    let distance = pips * symbol_cfg.pip_size;
    let sl_price = match direction {
        Direction::Buy => price - distance,
        Direction::Sell => price + distance,
    };

    (sl_price, distance)
}

/// Derive the take-profit price from the stop distance and the reward:risk
/// ratio.
pub fn take_profit(price: f64, sl_price: f64, direction: Direction, rr_ratio: f64) -> f64 {
    let distance = (price - sl_price).abs() * rr_ratio;
    match direction {
        Direction::Buy => price + distance,
        Direction::Sell => price - distance,
    }
}
