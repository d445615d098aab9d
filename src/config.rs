// =============================================================================
// Bot Configuration — typed settings with defaults and atomic save
// =============================================================================
//
// Central configuration hub for the Vertex engine. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash. Missing fields fall
// back to their defaults; unknown keys are a load error, never a silent
// default.
// =============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Volatility;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_profit_targets() -> Vec<f64> {
    vec![10.0, 20.0, 40.0, 80.0, 160.0]
}

fn default_multipliers() -> Vec<u32> {
    vec![1, 2, 4, 8, 16]
}

fn default_sl_reductions() -> Vec<f64> {
    vec![0.0, 10.0, 25.0, 40.0, 50.0]
}

fn default_max_level() -> u32 {
    4
}

fn default_rr_ratio() -> f64 {
    1.0
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_sim_balance() -> f64 {
    10_000.0
}

fn default_symbol_config() -> HashMap<String, SymbolConfig> {
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

fn default_risk_tiers() -> BTreeMap<u64, RiskTierParams> {
    // 5 % daily / 20 % lifetime of the tier balance.
    [5_000u64, 10_000, 25_000, 50_000, 100_000]
        .into_iter()
        .map(|tier| {
            (
                tier,
                RiskTierParams {
                    daily_loss_limit: tier as f64 * 0.05,
                    max_total_loss: tier as f64 * 0.20,
                },
            )
        })
        .collect()
}

fn default_fixed_lot_sizes() -> BTreeMap<u64, f64> {
    [
        (5_000u64, 0.05),
        (10_000, 0.10),
        (25_000, 0.25),
        (50_000, 0.50),
        (100_000, 1.00),
    ]
    .into_iter()
    .collect()
}

// =============================================================================
// Sections
// =============================================================================

/// Pyramid compounding schedule and switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfitBookingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dollar target per level; crossing it triggers the level-up.
    #[serde(default = "default_profit_targets")]
    pub profit_targets: Vec<f64>,

    /// Cohort size per level.
    #[serde(default = "default_multipliers")]
    pub multipliers: Vec<u32>,

    /// Per-level stop-loss tightening, percent of the base SL distance.
    #[serde(default = "default_sl_reductions")]
    pub sl_reductions: Vec<f64>,

    /// Highest level a chain can reach.
    #[serde(default = "default_max_level")]
    pub max_level: u32,
}

impl Default for ProfitBookingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profit_targets: default_profit_targets(),
            multipliers: default_multipliers(),
            sl_reductions: default_sl_reductions(),
            max_level: default_max_level(),
        }
    }
}

impl ProfitBookingConfig {
    /// Structural validation: all three vectors must have `max_level + 1`
    /// entries, targets and multipliers strictly positive, reductions in
    /// `[0, 100)`.
    pub fn validate(&self) -> Result<()> {
        let want = self.max_level as usize + 1;
        if self.profit_targets.len() != want
            || self.multipliers.len() != want
            || self.sl_reductions.len() != want
        {
            anyhow::bail!(
                "profit_booking_config: schedule length mismatch (max_level {} needs {} entries, got targets={} multipliers={} reductions={})",
                self.max_level,
                want,
                self.profit_targets.len(),
                self.multipliers.len(),
                self.sl_reductions.len()
            );
        }
        if let Some(t) = self.profit_targets.iter().find(|t| **t <= 0.0) {
            anyhow::bail!("profit_booking_config: non-positive profit target {t}");
        }
        if let Some(m) = self.multipliers.iter().find(|m| **m == 0) {
            anyhow::bail!("profit_booking_config: non-positive multiplier {m}");
        }
        if let Some(r) = self
            .sl_reductions
            .iter()
            .find(|r| **r < 0.0 || **r >= 100.0)
        {
            anyhow::bail!("profit_booking_config: sl reduction {r} outside [0, 100)");
        }
        Ok(())
    }
}

/// Per-instrument pip math parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolConfig {
    pub pip_size: f64,
    pub pip_value_per_std_lot: f64,
    #[serde(default)]
    pub volatility: Volatility,
}

/// Loss caps for one balance tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskTierParams {
    pub daily_loss_limit: f64,
    pub max_total_loss: f64,
}

/// Dual-order (A/B pair) risk validation switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DualOrderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DualOrderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Vertex engine.
///
/// Missing fields deserialise to their defaults; unknown keys fail the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub profit_booking_config: ProfitBookingConfig,

    /// Reward:risk ratio used to derive take-profit from the stop distance.
    #[serde(default = "default_rr_ratio")]
    pub rr_ratio: f64,

    /// When true the simulated broker is wired in instead of the live bridge.
    #[serde(default)]
    pub simulate_orders: bool,

    #[serde(default = "default_symbol_config")]
    pub symbol_config: HashMap<String, SymbolConfig>,

    /// Loss caps keyed by balance tier.
    #[serde(default = "default_risk_tiers")]
    pub risk_tiers: BTreeMap<u64, RiskTierParams>,

    /// Lot size keyed by balance tier.
    #[serde(default = "default_fixed_lot_sizes")]
    pub fixed_lot_sizes: BTreeMap<u64, f64>,

    /// Operator overrides keyed by exact integer balance.
    #[serde(default)]
    pub manual_lot_overrides: BTreeMap<i64, f64>,

    #[serde(default)]
    pub dual_order_config: DualOrderConfig,

    /// Directory for the chain store and the risk ledger stats file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Account balance reported by the simulated broker.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profit_booking_config: ProfitBookingConfig::default(),
            rr_ratio: default_rr_ratio(),
            simulate_orders: false,
            symbol_config: default_symbol_config(),
            risk_tiers: default_risk_tiers(),
            fixed_lot_sizes: default_fixed_lot_sizes(),
            manual_lot_overrides: BTreeMap::new(),
            dual_order_config: DualOrderConfig::default(),
            data_dir: default_data_dir(),
            sim_balance: default_sim_balance(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path` and validate it.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbols = ?config.symbol_config.keys().collect::<Vec<_>>(),
            simulate_orders = config.simulate_orders,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Cross-field validation run after every load.
    pub fn validate(&self) -> Result<()> {
        self.profit_booking_config.validate()?;

        if self.rr_ratio <= 0.0 {
            anyhow::bail!("rr_ratio must be positive, got {}", self.rr_ratio);
        }
        for (symbol, sc) in &self.symbol_config {
            if sc.pip_size <= 0.0 || sc.pip_value_per_std_lot <= 0.0 {
                anyhow::bail!(
                    "symbol_config[{symbol}]: pip_size and pip_value_per_std_lot must be positive"
                );
            }
        }
        for (tier, lot) in &self.fixed_lot_sizes {
            if *lot <= 0.0 {
                anyhow::bail!("fixed_lot_sizes[{tier}]: lot must be positive");
            }
        }
        Ok(())
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbol_config.get(symbol)
    }
}
