// =============================================================================
// Risk Policy — pure sizing and loss-cap decisions over account balance
// =============================================================================
//
// Everything here is deterministic over (config, balance, ledger snapshot):
// lot sizing walks tier thresholds top-down, cohort risk uses the
// volatility-class stop estimate, and the dual-order gate projects a 2x
// cohort loss against the tier caps.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{BotConfig, RiskTierParams};
use crate::error::RiskVeto;
use crate::pip::sl_pips_estimate;
use crate::risk::ledger::RiskLedger;
use crate::types::Volatility;

/// Balance tiers, highest first.
const TIERS: [u64; 5] = [100_000, 50_000, 25_000, 10_000, 5_000];

/// Smallest lot the policy will ever return.
const MIN_LOT: f64 = 0.05;

/// Fallback pip value when a symbol has no configuration entry.
const DEFAULT_PIP_VALUE: f64 = 10.0;

/// Stateless risk policy over the loaded configuration.
#[derive(Clone)]
pub struct RiskPolicy {
    config: Arc<BotConfig>,
}

impl RiskPolicy {
    pub fn new(config: Arc<BotConfig>) -> Self {
        Self { config }
    }

    // -------------------------------------------------------------------------
    // Lot sizing
    // -------------------------------------------------------------------------

    /// Fixed lot size for `balance`.
    ///
    /// Manual overrides (keyed by exact integer balance) win; otherwise the
    /// highest configured tier at or below the balance decides; otherwise the
    /// minimum lot.
    pub fn lot_for_balance(&self, balance: f64) -> f64 {
        if let Some(lot) = self.config.manual_lot_overrides.get(&(balance as i64)) {
            debug!(balance, lot, "manual lot override applied");
            return *lot;
        }

        for (tier, lot) in self.config.fixed_lot_sizes.iter().rev() {
            if balance >= *tier as f64 {
                return *lot;
            }
        }

        MIN_LOT
    }

    /// Highest fixed tier at or below `balance`; the smallest tier is the
    /// floor.
    pub fn tier_for_balance(&self, balance: f64) -> u64 {
        for tier in TIERS {
            if balance >= tier as f64 {
                return tier;
            }
        }
        TIERS[TIERS.len() - 1]
    }

    /// Loss-cap parameters for the tier `balance` falls into.
    pub fn tier_params(&self, balance: f64) -> Result<(u64, RiskTierParams), RiskVeto> {
        let tier = self.tier_for_balance(balance);
        match self.config.risk_tiers.get(&tier) {
            Some(params) => Ok((tier, *params)),
            None => Err(RiskVeto::UnknownTier { tier }),
        }
    }

    // -------------------------------------------------------------------------
    // Cohort risk
    // -------------------------------------------------------------------------

    /// Worst-case dollar loss of a cohort of `multiplier` orders at `lot`
    /// each, with the stop tightened by `sl_reduction` percent.
    pub fn estimate_cohort_risk(
        &self,
        symbol: &str,
        lot: f64,
        multiplier: u32,
        sl_reduction: f64,
    ) -> f64 {
        let (volatility, pip_value) = match self.config.symbol(symbol) {
            Some(sc) => (sc.volatility, sc.pip_value_per_std_lot),
            None => {
                warn!(symbol, "no symbol config, estimating risk with defaults");
                (Volatility::Medium, DEFAULT_PIP_VALUE)
            }
        };

        let sl_pips = sl_pips_estimate(volatility) * (1.0 - sl_reduction / 100.0);
        sl_pips * pip_value * lot * multiplier as f64
    }

    // -------------------------------------------------------------------------
    // Dual-order gate
    // -------------------------------------------------------------------------

    /// Veto check for placing a dual (2x lot) cohort: the projected worst-case
    /// loss must fit under both the daily and the lifetime cap of the current
    /// balance tier.
    pub fn validate_dual_order_risk(
        &self,
        ledger: &RiskLedger,
        balance: f64,
        symbol: &str,
        lot: f64,
    ) -> Result<(), RiskVeto> {
        if !self.config.dual_order_config.enabled {
            return Ok(());
        }

        let (tier, params) = self.tier_params(balance)?;
        let expected = self.estimate_cohort_risk(symbol, lot, 2, 0.0);
        let stats = ledger.snapshot();

        if stats.daily_loss + expected > params.daily_loss_limit {
            return Err(RiskVeto::DailyLossCap {
                projected: stats.daily_loss + expected,
                limit: params.daily_loss_limit,
            });
        }
        if stats.lifetime_loss + expected > params.max_total_loss {
            return Err(RiskVeto::LifetimeLossCap {
                projected: stats.lifetime_loss + expected,
                limit: params.max_total_loss,
            });
        }

        debug!(symbol, tier, expected, "dual order risk validation passed");
        Ok(())
    }
}

impl std::fmt::Debug for RiskPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskPolicy")
            .field("tiers", &self.config.risk_tiers.len())
            .field("manual_overrides", &self.config.manual_lot_overrides.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;

    fn policy() -> RiskPolicy {
        RiskPolicy::new(Arc::new(BotConfig::default()))
    }

    fn temp_ledger() -> RiskLedger {
        let path = std::env::temp_dir().join(format!(
            "vertex-policy-test-{}.json",
            uuid::Uuid::new_v4().simple()
        ));
        RiskLedger::load(path)
    }

    #[test]
    fn tier_walks_thresholds_descending() {
        let p = policy();
        assert_eq!(p.tier_for_balance(4_000.0), 5_000);
        assert_eq!(p.tier_for_balance(5_000.0), 5_000);
        assert_eq!(p.tier_for_balance(9_999.0), 5_000);
        assert_eq!(p.tier_for_balance(26_000.0), 25_000);
        assert_eq!(p.tier_for_balance(250_000.0), 100_000);
    }

    #[test]
    fn lot_follows_fixed_tiers() {
        let p = policy();
        assert!((p.lot_for_balance(5_000.0) - 0.05).abs() < 1e-12);
        assert!((p.lot_for_balance(12_000.0) - 0.10).abs() < 1e-12);
        assert!((p.lot_for_balance(100_000.0) - 1.00).abs() < 1e-12);
        // Below every tier the minimum applies.
        assert!((p.lot_for_balance(1_000.0) - MIN_LOT).abs() < 1e-12);
    }

    #[test]
    fn manual_override_wins_over_tiers() {
        let mut cfg = BotConfig::default();
        cfg.manual_lot_overrides.insert(12_000, 0.77);
        let p = RiskPolicy::new(Arc::new(cfg));
        assert!((p.lot_for_balance(12_000.4) - 0.77).abs() < 1e-12);
        // A different balance in the same tier is unaffected.
        assert!((p.lot_for_balance(12_001.0) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn cohort_risk_uses_volatility_estimate_and_reduction() {
        let p = policy();
        // XAUUSD is MEDIUM: 75 pips * (1 - 10%) * $10/pip * 0.1 lot * 4 orders.
        let risk = p.estimate_cohort_risk("XAUUSD", 0.1, 4, 10.0);
        assert!((risk - 75.0 * 0.9 * 10.0 * 0.1 * 4.0).abs() < 1e-9);
    }

    #[test]
    fn dual_order_gate_vetoes_over_daily_cap() {
        let p = policy();
        let ledger = temp_ledger();
        // Tier 5000 daily cap is $250; 2x 0.2 lot on XAUUSD projects
        // 75 * 10 * 0.2 * 2 = $300.
        let veto = p
            .validate_dual_order_risk(&ledger, 5_000.0, "XAUUSD", 0.2)
            .unwrap_err();
        assert!(matches!(veto, RiskVeto::DailyLossCap { .. }));
    }

    #[test]
    fn dual_order_gate_passes_small_lots() {
        let p = policy();
        let ledger = temp_ledger();
        // 75 * 10 * 0.05 * 2 = $75 < $250.
        p.validate_dual_order_risk(&ledger, 5_000.0, "XAUUSD", 0.05)
            .unwrap();
    }

    #[test]
    fn disabled_dual_orders_short_circuit() {
        let mut cfg = BotConfig::default();
        cfg.dual_order_config.enabled = false;
        let p = RiskPolicy::new(Arc::new(cfg));
        let ledger = temp_ledger();
        // Absurd lot, still fine: the gate is off.
        p.validate_dual_order_risk(&ledger, 5_000.0, "XAUUSD", 50.0)
            .unwrap();
    }
}
