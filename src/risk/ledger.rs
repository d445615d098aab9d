// =============================================================================
// Risk Ledger — persisted daily / lifetime loss counters
// =============================================================================
//
// The ledger is the stateful half of the risk governor: daily loss and profit,
// lifetime loss, and trade counts. Daily counters roll over automatically when
// the UTC date changes. Every mutation is persisted synchronously to the
// stats file with an atomic tmp + rename write; a corrupt or missing file
// resets to zeros for the current date.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RiskTierParams;

/// On-disk shape of `data/stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerStats {
    #[serde(default)]
    date: String,
    #[serde(default)]
    daily_loss: f64,
    #[serde(default)]
    daily_profit: f64,
    #[serde(default)]
    lifetime_loss: f64,
    #[serde(default)]
    total_trades: u64,
    #[serde(default)]
    winning_trades: u64,
}

impl LedgerStats {
    fn zeroed(date: String) -> Self {
        Self {
            date,
            daily_loss: 0.0,
            daily_profit: 0.0,
            lifetime_loss: 0.0,
            total_trades: 0,
            winning_trades: 0,
        }
    }
}

/// Read-only view of the ledger for callers and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub date: String,
    pub daily_loss: f64,
    pub daily_profit: f64,
    pub lifetime_loss: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub win_rate: f64,
}

/// Process-wide loss ledger. Construct once and share via `Arc`.
pub struct RiskLedger {
    stats: RwLock<LedgerStats>,
    path: PathBuf,
}

impl RiskLedger {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Load the ledger from `path`.
    ///
    /// A missing or corrupt file resets to zeros for the current date. A file
    /// carrying yesterday's date keeps lifetime counters and zeroes the daily
    /// ones.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let today = today_utc();

        let stats = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LedgerStats>(&content) {
                Ok(mut stats) => {
                    if stats.date != today {
                        debug!(
                            old_date = %stats.date,
                            new_date = %today,
                            "stats file from a previous day, zeroing daily counters"
                        );
                        stats.daily_loss = 0.0;
                        stats.daily_profit = 0.0;
                        stats.date = today;
                    }
                    stats
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "stats file corrupted, resetting");
                    LedgerStats::zeroed(today)
                }
            },
            Err(_) => LedgerStats::zeroed(today),
        };

        info!(
            path = %path.display(),
            daily_loss = stats.daily_loss,
            lifetime_loss = stats.lifetime_loss,
            total_trades = stats.total_trades,
            "risk ledger loaded"
        );

        Self {
            stats: RwLock::new(stats),
            path,
        }
    }

    // -------------------------------------------------------------------------
    // Trade recording
    // -------------------------------------------------------------------------

    /// Record the realised PnL of a completed trade and persist.
    ///
    /// Positive PnL grows daily profit and the win count; zero or negative
    /// PnL adds its magnitude to both the daily and the lifetime loss.
    pub fn record_trade(&self, pnl: f64) -> Result<()> {
        self.maybe_roll_day();
        let mut s = self.stats.write();

        s.total_trades += 1;
        if pnl > 0.0 {
            s.daily_profit += pnl;
            s.winning_trades += 1;
        } else {
            s.daily_loss += pnl.abs();
            s.lifetime_loss += pnl.abs();
        }

        debug!(
            pnl,
            daily_loss = s.daily_loss,
            daily_profit = s.daily_profit,
            lifetime_loss = s.lifetime_loss,
            total_trades = s.total_trades,
            "trade recorded in ledger"
        );

        Self::save(&self.path, &s)
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// True when neither the daily nor the lifetime loss cap of the given
    /// tier is exhausted.
    pub fn can_trade(&self, params: &RiskTierParams) -> bool {
        self.maybe_roll_day();
        let s = self.stats.read();

        if s.lifetime_loss >= params.max_total_loss {
            warn!(
                lifetime_loss = s.lifetime_loss,
                limit = params.max_total_loss,
                "trading blocked: lifetime loss limit reached"
            );
            return false;
        }
        if s.daily_loss >= params.daily_loss_limit {
            warn!(
                daily_loss = s.daily_loss,
                limit = params.daily_loss_limit,
                "trading blocked: daily loss limit reached"
            );
            return false;
        }

        true
    }

    // -------------------------------------------------------------------------
    // Snapshot / resets
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.maybe_roll_day();
        let s = self.stats.read();
        let win_rate = if s.total_trades > 0 {
            s.winning_trades as f64 / s.total_trades as f64 * 100.0
        } else {
            0.0
        };
        LedgerSnapshot {
            date: s.date.clone(),
            daily_loss: s.daily_loss,
            daily_profit: s.daily_profit,
            lifetime_loss: s.lifetime_loss,
            total_trades: s.total_trades,
            winning_trades: s.winning_trades,
            win_rate,
        }
    }

    /// Zero the daily loss and profit counters (admin action).
    pub fn reset_daily(&self) -> Result<()> {
        let mut s = self.stats.write();
        s.daily_loss = 0.0;
        s.daily_profit = 0.0;
        info!("daily ledger counters reset (manual)");
        Self::save(&self.path, &s)
    }

    /// Zero the lifetime loss counter (admin action).
    pub fn reset_lifetime_loss(&self) -> Result<()> {
        let mut s = self.stats.write();
        s.lifetime_loss = 0.0;
        info!("lifetime loss counter reset (manual)");
        Self::save(&self.path, &s)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// If the UTC date has changed since the last check, zero the daily
    /// counters.
    fn maybe_roll_day(&self) {
        let today = today_utc();
        {
            let s = self.stats.read();
            if s.date == today {
                return;
            }
        }
        // Date has changed — acquire the write lock and re-check (another
        // thread may have already rolled).
        let mut s = self.stats.write();
        if s.date != today {
            info!(old_date = %s.date, new_date = %today, "date rolled, zeroing daily counters");
            s.daily_loss = 0.0;
            s.daily_profit = 0.0;
            s.date = today;
            if let Err(e) = Self::save(&self.path, &s) {
                warn!(error = %e, "failed to persist ledger after day roll");
            }
        }
    }

    /// Atomic tmp + rename write of the stats file.
    fn save(path: &Path, stats: &LedgerStats) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create stats dir {}", parent.display())
                })?;
            }
        }

        let content =
            serde_json::to_string_pretty(stats).context("failed to serialise ledger stats")?;
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp stats to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp stats to {}", path.display()))?;

        Ok(())
    }
}

impl std::fmt::Debug for RiskLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.stats.read();
        f.debug_struct("RiskLedger")
            .field("date", &s.date)
            .field("daily_loss", &s.daily_loss)
            .field("lifetime_loss", &s.lifetime_loss)
            .field("total_trades", &s.total_trades)
            .finish()
    }
}

fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
