// =============================================================================
// Chain Engine — lifecycle of profit-booking chains
// =============================================================================
//
// Owns the registry of live chains and every mutation on them: creation from
// a PROFIT_TRAIL seed, the periodic tick, the level-up transition, stopping,
// and fault escalation. Each chain is guarded by its own async mutex; the
// registry lock is held only long enough to clone a handle out.
//
// Ordering rules enforced here:
//   - a chain/order row reaches the store before the broker action it
//     describes is attempted; the only inconsistency a crash can leave is
//     broker-ahead-of-store, which startup reconciliation resolves.
//   - current_level never decreases.
//   - three consecutive level-up attempts failing before commit move the
//     chain to FAULTED and out of the tick rotation.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerClient, OrderRequest};
use crate::chain::pnl;
use crate::chain::state::{
    Chain, ChainOrder, ChainOrderState, ChainStatus, ProgressionEvent, Schedule,
};
use crate::chain::store::ChainStore;
use crate::config::BotConfig;
use crate::error::EngineError;
use crate::feed::PriceFeed;
use crate::notify::Notifier;
use crate::pip;
use crate::risk::{RiskLedger, RiskPolicy};
use crate::trade_book::TradeBook;
use crate::types::{OrderKind, Trade, TradeState};

/// Consecutive failed level-up attempts before a chain is faulted.
const MAX_FAULT_STREAK: u32 = 3;

/// Close reason stamped on cohort orders booked for profit.
const CLOSE_REASON_PROFIT: &str = "PROFIT_BOOKING";

/// Fallback strategy tag for order comments.
const DEFAULT_STRATEGY: &str = "LOGIC1";

/// One registered chain behind its serialisation lock.
struct ChainCell {
    chain: Mutex<Chain>,
}

/// The profit-booking engine. Construct once, share via `Arc`.
pub struct ChainEngine {
    config: Arc<BotConfig>,
    store: Arc<dyn ChainStore>,
    broker: Arc<dyn BrokerClient>,
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn Notifier>,
    policy: RiskPolicy,
    ledger: Arc<RiskLedger>,
    book: Arc<TradeBook>,
    chains: RwLock<HashMap<String, Arc<ChainCell>>>,
}

impl ChainEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<BotConfig>,
        store: Arc<dyn ChainStore>,
        broker: Arc<dyn BrokerClient>,
        feed: Arc<dyn PriceFeed>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<RiskLedger>,
        book: Arc<TradeBook>,
    ) -> Self {
        let policy = RiskPolicy::new(config.clone());
        Self {
            config,
            store,
            broker,
            feed,
            notifier,
            policy,
            ledger,
            book,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.profit_booking_config.enabled
    }

    /// Ids of all registered chains (any status).
    pub fn chain_ids(&self) -> Vec<String> {
        self.chains.read().keys().cloned().collect()
    }

    /// Clone of one chain's current state.
    pub async fn snapshot(&self, chain_id: &str) -> Option<Chain> {
        let cell = self.chains.read().get(chain_id).cloned()?;
        let chain = cell.chain.lock().await;
        Some(chain.clone())
    }

    /// Register a chain rebuilt by startup reconciliation.
    pub fn register_recovered(&self, chain: Chain) {
        info!(
            chain_id = %chain.chain_id,
            level = chain.current_level,
            orders = chain.active_order_ids.len(),
            "recovered chain registered"
        );
        self.chains.write().insert(
            chain.chain_id.clone(),
            Arc::new(ChainCell {
                chain: Mutex::new(chain),
            }),
        );
    }

    fn cell(&self, chain_id: &str) -> Result<Arc<ChainCell>, EngineError> {
        self.chains
            .read()
            .get(chain_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownChain {
                chain_id: chain_id.to_string(),
            })
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Create a profit-booking chain from a PROFIT_TRAIL seed trade.
    ///
    /// Returns `Ok(None)` when the subsystem is disabled or the seed is not a
    /// profit-trail order. On any persistence failure the chain is not
    /// registered in memory.
    pub fn create_chain(&self, seed: &Trade) -> Result<Option<Chain>, EngineError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if seed.kind != OrderKind::ProfitTrail {
            return Ok(None);
        }

        let booking = &self.config.profit_booking_config;
        let schedule = Schedule::from_config(booking);
        schedule
            .validate(booking.max_level)
            .map_err(|reason| EngineError::ConfigInvalid { reason })?;

        let chain_id = format!(
            "PROFIT_{}_{}",
            seed.symbol,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let chain = Chain::from_seed(chain_id.clone(), seed, booking.max_level, schedule);

        self.store
            .save_chain(&chain)
            .map_err(EngineError::Persistence)?;

        if let Some(ticket) = seed.order_id {
            let row = ChainOrder {
                order_id: ticket,
                chain_id: chain_id.clone(),
                level: 0,
                profit_target: chain.schedule.target(0),
                sl_reduction_pct: chain.schedule.reduction(0),
                state: ChainOrderState::Open,
            };
            self.store
                .save_order(&row)
                .map_err(EngineError::Persistence)?;
            self.book.stamp_chain(ticket, &chain_id, 0);
        }

        self.chains.write().insert(
            chain_id.clone(),
            Arc::new(ChainCell {
                chain: Mutex::new(chain.clone()),
            }),
        );

        info!(
            chain_id = %chain_id,
            symbol = %chain.symbol,
            direction = %chain.direction,
            base_lot = chain.base_lot,
            "profit booking chain created"
        );
        Ok(Some(chain))
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// One monitoring step for one chain.
    ///
    /// Completes the chain at max level, otherwise compares the cohort's
    /// unrealised PnL against the current level's target and levels up on a
    /// crossing. A price of 0 yields PnL 0 and never triggers (targets are
    /// strictly positive).
    pub async fn tick(&self, chain_id: &str) -> Result<(), EngineError> {
        let cell = self.cell(chain_id)?;
        let mut chain = cell.chain.lock().await;

        if chain.status != ChainStatus::Active {
            return Ok(());
        }

        if chain.current_level >= chain.max_level {
            let mut updated = chain.clone();
            updated.status = ChainStatus::Completed;
            updated.touch();
            self.store
                .save_chain(&updated)
                .map_err(EngineError::Persistence)?;
            *chain = updated;
            info!(chain_id = %chain.chain_id, level = chain.current_level, "chain completed: max level reached");
            return Ok(());
        }

        let open_trades = self.book.snapshot_open();
        let pnl_now = pnl::cohort_pnl(
            &chain,
            &open_trades,
            self.feed.as_ref(),
            &self.config.symbol_config,
        );
        let target = chain.schedule.target(chain.current_level);

        if pnl_now < target {
            debug!(
                chain_id = %chain.chain_id,
                level = chain.current_level,
                pnl = pnl_now,
                target,
                "target not reached"
            );
            return Ok(());
        }

        info!(
            chain_id = %chain.chain_id,
            level = chain.current_level,
            pnl = format!("{pnl_now:.2}"),
            target,
            "profit target reached"
        );

        match self.level_up(&mut chain, pnl_now).await {
            Ok(()) => {
                chain.fault_streak = 0;
                Ok(())
            }
            Err(e) => {
                chain.fault_streak += 1;
                warn!(
                    chain_id = %chain.chain_id,
                    streak = chain.fault_streak,
                    error = %e,
                    "level-up attempt failed"
                );
                if chain.fault_streak >= MAX_FAULT_STREAK {
                    let mut updated = chain.clone();
                    updated.status = ChainStatus::Faulted;
                    updated.touch();
                    match self.store.save_chain(&updated) {
                        Ok(()) => {
                            *chain = updated;
                            error!(
                                chain_id = %chain.chain_id,
                                streak = chain.fault_streak,
                                "chain faulted after repeated level-up failures"
                            );
                        }
                        Err(pe) => {
                            warn!(chain_id = %chain.chain_id, error = %pe, "failed to persist faulted status");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Level-up
    // -------------------------------------------------------------------------

    /// Transition `current_level = L -> L+1`: close the level-L cohort, pass
    /// the risk gate, open the L+1 cohort, commit, notify.
    async fn level_up(&self, chain: &mut Chain, booked_pnl: f64) -> Result<(), EngineError> {
        let from = chain.current_level;
        let to = from + 1;
        let expected_close = chain.schedule.multiplier(from);
        let expected_open = chain.schedule.multiplier(to);

        info!(
            chain_id = %chain.chain_id,
            from,
            to,
            expected_close,
            expected_open,
            booked = format!("{booked_pnl:.2}"),
            "level-up starting"
        );

        // The store must acknowledge the chain before any broker call.
        let mut intent = chain.clone();
        intent.touch();
        self.store
            .save_chain(&intent)
            .map_err(EngineError::Persistence)?;
        *chain = intent;

        let cohort: Vec<Trade> = self
            .book
            .snapshot_open()
            .into_iter()
            .filter(|t| {
                t.chain_id.as_deref() == Some(chain.chain_id.as_str())
                    && t.chain_level == from
                    && t.is_open()
            })
            .collect();

        if cohort.is_empty() {
            warn!(chain_id = %chain.chain_id, level = from, "no open trades in cohort, level-up skipped");
            return Ok(());
        }

        // ── Close the current cohort ─────────────────────────────────────
        // Individual failures do not abort: a partially closed cohort is
        // recoverable, an aborted half-transition is not better.
        let mut orders_closed: u32 = 0;
        for trade in &cohort {
            let Some(ticket) = trade.order_id else {
                continue;
            };
            let price = self.feed.get_price(&trade.symbol);
            if price <= 0.0 {
                warn!(ticket, symbol = %trade.symbol, "no price for close, order left open");
                continue;
            }
            match self.broker.close_order(ticket, price).await {
                Ok(()) => {
                    orders_closed += 1;
                    let trade_pnl = self
                        .config
                        .symbol(&trade.symbol)
                        .map(|sc| pnl::trade_pnl(trade, price, sc))
                        .unwrap_or(0.0);
                    self.book.close(ticket, CLOSE_REASON_PROFIT, price, trade_pnl);
                    if let Err(e) = self.ledger.record_trade(trade_pnl) {
                        warn!(ticket, error = %e, "ledger update failed for booked trade");
                    }
                    let row = ChainOrder {
                        order_id: ticket,
                        chain_id: chain.chain_id.clone(),
                        level: from,
                        profit_target: chain.schedule.target(from),
                        sl_reduction_pct: chain.schedule.reduction(from),
                        state: ChainOrderState::ClosedTarget,
                    };
                    if let Err(e) = self.store.save_order(&row) {
                        warn!(ticket, error = %e, "failed to persist closed order row");
                    }
                }
                Err(e) => {
                    warn!(ticket, error = %e, "cohort close failed, continuing");
                }
            }
        }

        // ── Risk gate for the next cohort ────────────────────────────────
        let balance = self
            .broker
            .get_balance()
            .await
            .map_err(EngineError::Broker)?;
        let lot = self.policy.lot_for_balance(balance);

        let allowed = match self.policy.tier_params(balance) {
            Ok((_, params)) => self.ledger.can_trade(&params),
            Err(veto) => {
                warn!(chain_id = %chain.chain_id, veto = %veto, "risk tier unresolved");
                false
            }
        };
        if !allowed {
            warn!(
                chain_id = %chain.chain_id,
                balance,
                "risk governor vetoed the next cohort, stopping chain"
            );
            let mut updated = chain.clone();
            updated.status = ChainStatus::Stopped;
            updated.touch();
            self.store
                .save_chain(&updated)
                .map_err(EngineError::Persistence)?;
            *chain = updated;
            return Ok(());
        }

        let projected_risk =
            self.policy
                .estimate_cohort_risk(&chain.symbol, lot, expected_open, chain.schedule.reduction(to));
        debug!(
            chain_id = %chain.chain_id,
            lot,
            orders = expected_open,
            projected_risk = format!("{projected_risk:.2}"),
            "next cohort sizing"
        );

        // ── Next-cohort parameters ───────────────────────────────────────
        let price = self.feed.get_price(&chain.symbol);
        if price <= 0.0 {
            return Err(EngineError::PriceUnavailable {
                symbol: chain.symbol.clone(),
            });
        }

        let symbol_cfg =
            self.config
                .symbol(&chain.symbol)
                .ok_or_else(|| EngineError::ConfigInvalid {
                    reason: format!("no symbol config for {}", chain.symbol),
                })?;
        let sl_adj = 1.0 - chain.schedule.reduction(to) / 100.0;
        let (sl_price, _sl_distance) =
            pip::stop_loss(symbol_cfg, price, chain.direction, lot, balance, sl_adj);
        let tp_price = pip::take_profit(price, sl_price, chain.direction, self.config.rr_ratio);

        // ── Open the next cohort ─────────────────────────────────────────
        let strategy = if chain.metadata.strategy.is_empty() {
            DEFAULT_STRATEGY.to_string()
        } else {
            chain.metadata.strategy.clone()
        };
        let comment = format!("{strategy}_PROFIT_L{to}");

        let mut new_ids: Vec<u64> = Vec::with_capacity(expected_open as usize);
        for slot in 0..expected_open {
            let request = OrderRequest {
                symbol: chain.symbol.clone(),
                direction: chain.direction,
                lot,
                price,
                sl: sl_price,
                tp: tp_price,
                comment: comment.clone(),
            };
            match self.broker.place_order(&request).await {
                Ok(ticket) => {
                    let row = ChainOrder {
                        order_id: ticket,
                        chain_id: chain.chain_id.clone(),
                        level: to,
                        profit_target: chain.schedule.target(to),
                        sl_reduction_pct: chain.schedule.reduction(to),
                        state: ChainOrderState::Open,
                    };
                    match self.store.save_order(&row) {
                        Ok(()) => {
                            new_ids.push(ticket);
                            self.book.add(Trade {
                                order_id: Some(ticket),
                                symbol: chain.symbol.clone(),
                                direction: chain.direction,
                                entry: price,
                                sl: sl_price,
                                tp: tp_price,
                                lot,
                                strategy: strategy.clone(),
                                kind: OrderKind::ProfitTrail,
                                chain_id: Some(chain.chain_id.clone()),
                                chain_level: to,
                                state: TradeState::Open,
                                opened_at: Utc::now().to_rfc3339(),
                                closed_at: None,
                                close_reason: None,
                                realized_pnl: 0.0,
                            });
                        }
                        Err(e) => {
                            // The live order is now ahead of the store; the
                            // next reconciliation will pick it up as an
                            // orphan.
                            error!(
                                ticket,
                                error = %e,
                                "placed order row not persisted, left for reconciliation"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        slot,
                        fatal = e.is_fatal(),
                        error = %e,
                        "order placement failed, continuing with fewer placements"
                    );
                }
            }
        }

        if new_ids.is_empty() {
            let mut updated = chain.clone();
            updated.status = ChainStatus::Faulted;
            updated.touch();
            self.store
                .save_chain(&updated)
                .map_err(EngineError::Persistence)?;
            *chain = updated;
            error!(chain_id = %chain.chain_id, to, "no orders placed for next cohort, chain faulted");
            return Ok(());
        }

        // ── Commit the transition ────────────────────────────────────────
        let orders_placed = new_ids.len() as u32;
        let mut updated = chain.clone();
        updated.current_level = to;
        updated.active_order_ids = new_ids;
        updated.total_profit_booked += booked_pnl;
        updated.touch();
        self.store
            .save_chain(&updated)
            .map_err(EngineError::Persistence)?;
        *chain = updated;

        // The chain row is durable; an event append failure loses audit
        // detail but never ordering (the row already shows the new level).
        let event = ProgressionEvent {
            chain_id: chain.chain_id.clone(),
            from_level: from,
            to_level: to,
            profit_booked: booked_pnl,
            orders_closed,
            orders_placed,
            ts: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.append_event(&event) {
            warn!(chain_id = %chain.chain_id, error = %e, "failed to append progression event");
        }

        info!(
            chain_id = %chain.chain_id,
            from,
            to,
            profit = format!("{booked_pnl:.2}"),
            orders_closed,
            orders_placed,
            "profit booking executed"
        );

        let message = format!(
            "🔁 PROFIT BOOKING LEVEL UP!\n\
             Chain: {}\n\
             Level: {} → {}\n\
             Profit Booked: ${:.2}\n\
             Orders Closed: {}\n\
             Orders Placed: {}\n\
             Next Target: ${:.2}\n\
             SL Reduction: {}%",
            chain.chain_id,
            from,
            to,
            booked_pnl,
            orders_closed,
            orders_placed,
            chain.schedule.target(to),
            chain.schedule.reduction(to)
        );
        self.notifier.send(&message).await;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------------

    /// Stop one chain. Outstanding broker orders are left to their own SL/TP.
    pub async fn stop(&self, chain_id: &str, reason: &str) -> Result<(), EngineError> {
        let cell = self.cell(chain_id)?;
        let mut chain = cell.chain.lock().await;

        if chain.is_terminal() {
            debug!(chain_id, status = %chain.status, "stop ignored for terminal chain");
            return Ok(());
        }

        let mut updated = chain.clone();
        updated.status = ChainStatus::Stopped;
        updated.touch();
        self.store
            .save_chain(&updated)
            .map_err(EngineError::Persistence)?;
        *chain = updated;

        info!(
            chain_id,
            reason,
            orders = chain.active_order_ids.len(),
            "chain stopped, broker orders left to their own SL/TP"
        );
        Ok(())
    }

    /// Stop every registered chain.
    pub async fn stop_all(&self, reason: &str) {
        for chain_id in self.chain_ids() {
            if let Err(e) = self.stop(&chain_id, reason).await {
                warn!(chain_id = %chain_id, error = %e, "stop_all: failed to stop chain");
            }
        }
    }
}

impl std::fmt::Debug for ChainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEngine")
            .field("enabled", &self.is_enabled())
            .field("chains", &self.chains.read().len())
            .field("book", &self.book)
            .finish()
    }
}
