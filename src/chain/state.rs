// =============================================================================
// Chain State — the pyramid compounding entity and its durable rows
// =============================================================================
//
// Life-cycle:
//   ACTIVE  ->  ACTIVE (level-up)      repeated until max level
//   ACTIVE  ->  COMPLETED              max level reached
//   ACTIVE  ->  STOPPED                operator or risk governor
//   ACTIVE  ->  FAULTED                repeated level-up failures
//
// COMPLETED / STOPPED / FAULTED are absorbing: no further transitions.
// The schedule is snapshotted at creation and persisted with the chain row,
// so recovery never depends on the config file in effect at restart time.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::ProfitBookingConfig;
use crate::types::{Direction, Trade};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Current status of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Active,
    Completed,
    Stopped,
    Faulted,
}

impl ChainStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Faulted => write!(f, "FAULTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Immutable per-chain snapshot of the compounding schedule.
///
/// All three vectors have `max_level + 1` entries; index = level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub profit_targets: Vec<f64>,
    pub multipliers: Vec<u32>,
    pub sl_reductions: Vec<f64>,
}

impl Schedule {
    /// Snapshot the currently configured schedule.
    pub fn from_config(config: &ProfitBookingConfig) -> Self {
        Self {
            profit_targets: config.profit_targets.clone(),
            multipliers: config.multipliers.clone(),
            sl_reductions: config.sl_reductions.clone(),
        }
    }

    /// Structural validation mirroring the config rules; a chain is never
    /// created over a schedule that fails this.
    pub fn validate(&self, max_level: u32) -> Result<(), String> {
        let want = max_level as usize + 1;
        if self.profit_targets.len() != want
            || self.multipliers.len() != want
            || self.sl_reductions.len() != want
        {
            return Err(format!(
                "schedule length mismatch: max_level {max_level} needs {want} entries"
            ));
        }
        if self.profit_targets.iter().any(|t| *t <= 0.0) {
            return Err("non-positive profit target".to_string());
        }
        if self.multipliers.iter().any(|m| *m == 0) {
            return Err("non-positive multiplier".to_string());
        }
        if self.sl_reductions.iter().any(|r| *r < 0.0 || *r >= 100.0) {
            return Err("sl reduction outside [0, 100)".to_string());
        }
        Ok(())
    }

    pub fn target(&self, level: u32) -> f64 {
        self.profit_targets.get(level as usize).copied().unwrap_or(0.0)
    }

    pub fn multiplier(&self, level: u32) -> u32 {
        self.multipliers.get(level as usize).copied().unwrap_or(1)
    }

    pub fn reduction(&self, level: u32) -> f64 {
        self.sl_reductions.get(level as usize).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Details of the seed trade, kept for audit and order comments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainMetadata {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub original_entry: f64,
    #[serde(default)]
    pub original_sl: f64,
    #[serde(default)]
    pub original_tp: f64,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// One profit-booking chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: String,
    pub symbol: String,
    pub direction: Direction,
    /// Lot size of the seed order; reference only, level lots come from the
    /// risk policy.
    pub base_lot: f64,
    pub current_level: u32,
    pub max_level: u32,
    /// Realised dollars banked across completed levels.
    #[serde(default)]
    pub total_profit_booked: f64,
    /// Broker tickets of the current-level cohort, in placement order.
    #[serde(default)]
    pub active_order_ids: Vec<u64>,
    pub status: ChainStatus,
    pub created_at: String,
    pub updated_at: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub metadata: ChainMetadata,
    /// Consecutive failed level-up attempts; in-memory only.
    #[serde(skip)]
    pub fault_streak: u32,
}

impl Chain {
    /// Build a fresh level-0 chain from a seed trade.
    pub fn from_seed(chain_id: String, seed: &Trade, max_level: u32, schedule: Schedule) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            chain_id,
            symbol: seed.symbol.clone(),
            direction: seed.direction,
            base_lot: seed.lot,
            current_level: 0,
            max_level,
            total_profit_booked: 0.0,
            active_order_ids: seed.order_id.into_iter().collect(),
            status: ChainStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            schedule,
            metadata: ChainMetadata {
                strategy: seed.strategy.clone(),
                original_entry: seed.entry,
                original_sl: seed.sl,
                original_tp: seed.tp,
            },
            fault_streak: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Refresh the `updated_at` stamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}

// ---------------------------------------------------------------------------
// Durable rows
// ---------------------------------------------------------------------------

/// State of a chain-owned order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainOrderState {
    Open,
    ClosedTarget,
    ClosedStop,
    ClosedManual,
}

/// Durable row for every order placed under a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOrder {
    pub order_id: u64,
    pub chain_id: String,
    pub level: u32,
    /// Profit target in effect when the order was placed.
    pub profit_target: f64,
    /// SL reduction percentage in effect when the order was placed.
    pub sl_reduction_pct: f64,
    pub state: ChainOrderState,
}

/// Append-only record of one level-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionEvent {
    pub chain_id: String,
    pub from_level: u32,
    pub to_level: u32,
    pub profit_booked: f64,
    pub orders_closed: u32,
    pub orders_placed: u32,
    pub ts: String,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderKind, TradeState};

    fn seed() -> Trade {
        Trade {
            order_id: Some(123_456),
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

    fn schedule() -> Schedule {
        Schedule::from_config(&ProfitBookingConfig::default())
    }

    #[test]
    fn from_seed_starts_at_level_zero() {
        let chain = Chain::from_seed("PROFIT_XAUUSD_0a1b2c3d".into(), &seed(), 4, schedule());
        assert_eq!(chain.current_level, 0);
        assert_eq!(chain.status, ChainStatus::Active);
        assert_eq!(chain.active_order_ids, vec![123_456]);
        assert!((chain.base_lot - 0.05).abs() < 1e-12);
        assert_eq!(chain.metadata.strategy, "LOGIC1");
        assert!((chain.metadata.original_entry - 2000.0).abs() < 1e-12);
    }

    #[test]
    fn seed_without_ticket_yields_empty_cohort() {
        let mut t = seed();
        t.order_id = None;
        let chain = Chain::from_seed("PROFIT_XAUUSD_0a1b2c3d".into(), &t, 4, schedule());
        assert!(chain.active_order_ids.is_empty());
    }

    #[test]
    fn schedule_accessors_index_by_level() {
        let s = schedule();
        assert_eq!(s.target(0), 10.0);
        assert_eq!(s.target(4), 160.0);
        assert_eq!(s.multiplier(1), 2);
        assert_eq!(s.multiplier(4), 16);
        assert_eq!(s.reduction(2), 25.0);
        // Out of range falls back to inert values.
        assert_eq!(s.target(9), 0.0);
        assert_eq!(s.multiplier(9), 1);
        assert_eq!(s.reduction(9), 0.0);
    }

    #[test]
    fn schedule_validation_rejects_structural_violations() {
        let mut s = schedule();
        assert!(s.validate(4).is_ok());
        assert!(s.validate(3).is_err());

        s.profit_targets[0] = 0.0;
        assert!(s.validate(4).is_err());

        let mut s = schedule();
        s.sl_reductions[1] = 100.0;
        assert!(s.validate(4).is_err());

        let mut s = schedule();
        s.multipliers[3] = 0;
        assert!(s.validate(4).is_err());
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!ChainStatus::Active.is_terminal());
        assert!(ChainStatus::Completed.is_terminal());
        assert!(ChainStatus::Stopped.is_terminal());
        assert!(ChainStatus::Faulted.is_terminal());
    }

    #[test]
    fn serde_roundtrip_preserves_schedule_and_skips_fault_streak() {
        let mut chain = Chain::from_seed("PROFIT_XAUUSD_0a1b2c3d".into(), &seed(), 4, schedule());
        chain.fault_streak = 2;

        let json = serde_json::to_string(&chain).unwrap();
        assert!(json.contains("\"ACTIVE\""));

        let back: Chain = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schedule, chain.schedule);
        assert_eq!(back.chain_id, chain.chain_id);
        // Not persisted by design.
        assert_eq!(back.fault_streak, 0);
    }
}
