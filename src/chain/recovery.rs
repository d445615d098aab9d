// =============================================================================
// Recovery Reconciler — rebuild chains from the store and broker truth
// =============================================================================
//
// On process start the store's rows are the authority on chain progress and
// the broker is the authority on which orders actually exist. The reconciler
// joins the two:
//
//   1. Fetch live open orders and seed the trade book with them.
//   2. Re-tag each live order from its persisted chain_orders row.
//   3. Rebuild every ACTIVE chain from its row (schedule included) and attach
//      the live orders whose recorded level matches the chain's level.
//   4. Clear the tag of any live order whose chain did not come back; the
//      order keeps running on its own SL/TP.
//
// Like the rest of the engine, recovery never cancels or closes anything on
// the broker; drift is logged and left to the operator.
// =============================================================================

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::chain::engine::ChainEngine;
use crate::chain::store::ChainStore;
use crate::trade_book::TradeBook;

/// Summary of one recovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    /// ACTIVE chains rebuilt into the engine.
    pub chains_recovered: u32,
    /// Live orders attached to their chain's current cohort.
    pub orders_attached: u32,
    /// Live orders tagged to a recovered chain but at a stale level
    /// (crash mid-level-up); left to their own SL/TP.
    pub stale_level_orders: u32,
    /// Live orders whose chain did not come back; tags cleared.
    pub orphans_cleared: u32,
    /// ISO-8601 timestamp of this recovery run.
    pub timestamp: String,
}

/// Run one full recovery pass. Call once at startup, before the monitor loop
/// begins ticking.
pub async fn recover_chains(
    engine: &ChainEngine,
    store: &dyn ChainStore,
    broker: &dyn BrokerClient,
    book: &TradeBook,
) -> Result<RecoveryReport> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "chain recovery started");

    // -----------------------------------------------------------------
    // 1. Broker truth
    // -----------------------------------------------------------------
    let live_orders = broker
        .get_open_orders()
        .await
        .context("recovery: failed to fetch open orders from broker")?;
    book.seed_open(live_orders);

    // -----------------------------------------------------------------
    // 2. Re-tag live orders from their persisted rows
    // -----------------------------------------------------------------
    let open_rows = store
        .load_open_orders()
        .context("recovery: failed to load open order rows")?;
    let row_by_ticket: HashMap<u64, _> = open_rows.iter().map(|r| (r.order_id, r)).collect();

    for trade in book.snapshot_open() {
        if let Some(ticket) = trade.order_id {
            if let Some(row) = row_by_ticket.get(&ticket) {
                book.stamp_chain(ticket, &row.chain_id, row.level);
            }
        }
    }

    // -----------------------------------------------------------------
    // 3. Rebuild ACTIVE chains; the schedule comes from the row, never
    //    from the config in effect at restart time
    // -----------------------------------------------------------------
    let rows = store
        .load_active_chains()
        .context("recovery: failed to load active chains")?;

    let open_trades = book.snapshot_open();
    let mut chains_recovered: u32 = 0;
    let mut orders_attached: u32 = 0;
    let mut stale_level_orders: u32 = 0;

    for mut chain in rows {
        let mut active_ids: Vec<u64> = Vec::new();

        for trade in &open_trades {
            if trade.chain_id.as_deref() != Some(chain.chain_id.as_str()) || !trade.is_open() {
                continue;
            }
            let Some(ticket) = trade.order_id else { continue };

            if trade.chain_level == chain.current_level {
                active_ids.push(ticket);
                orders_attached += 1;
            } else {
                stale_level_orders += 1;
                warn!(
                    ticket,
                    chain_id = %chain.chain_id,
                    order_level = trade.chain_level,
                    chain_level = chain.current_level,
                    "live order at stale level, left to its own SL/TP"
                );
            }
        }

        chain.active_order_ids = active_ids;
        info!(
            chain_id = %chain.chain_id,
            level = chain.current_level,
            orders = chain.active_order_ids.len(),
            "chain recovered"
        );
        engine.register_recovered(chain);
        chains_recovered += 1;
    }

    // -----------------------------------------------------------------
    // 4. Orphans: tags pointing at chains that did not come back
    // -----------------------------------------------------------------
    let registered: HashSet<String> = engine.chain_ids().into_iter().collect();
    let mut orphans_cleared: u32 = 0;

    for trade in book.snapshot_open() {
        if let (Some(ticket), Some(chain_id)) = (trade.order_id, trade.chain_id.as_ref()) {
            if !registered.contains(chain_id) {
                warn!(
                    ticket,
                    chain_id = %chain_id,
                    "orphaned order: chain not active, clearing tag"
                );
                book.clear_chain_tag(ticket);
                orphans_cleared += 1;
            }
        }
    }

    let report = RecoveryReport {
        chains_recovered,
        orders_attached,
        stale_level_orders,
        orphans_cleared,
        timestamp: now,
    };

    info!(
        chains = report.chains_recovered,
        orders = report.orders_attached,
        stale = report.stale_level_orders,
        orphans = report.orphans_cleared,
        "chain recovery completed"
    );

    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::chain::state::{Chain, ChainOrder, ChainOrderState, ChainStatus, Schedule};
    use crate::chain::store::MemoryChainStore;
    use crate::config::BotConfig;
    use crate::risk::RiskLedger;
    use crate::test_support::{MockBroker, RecordingNotifier, StaticFeed};
    use crate::types::{Direction, OrderKind, Trade, TradeState};

    fn engine(store: Arc<MemoryChainStore>, broker: Arc<MockBroker>) -> (Arc<ChainEngine>, Arc<TradeBook>) {
        let book = Arc::new(TradeBook::new());
        let ledger = Arc::new(RiskLedger::load(std::env::temp_dir().join(format!(
            "vertex-recovery-test-{}.json",
            uuid::Uuid::new_v4().simple()
        ))));
        let engine = Arc::new(ChainEngine::new(
            Arc::new(BotConfig::default()),
            store,
            broker,
            Arc::new(StaticFeed::new()),
            Arc::new(RecordingNotifier::new()),
            ledger,
            book.clone(),
        ));
        (engine, book)
    }

    fn live_order(ticket: u64) -> Trade {
        Trade {
            order_id: Some(ticket),
            symbol: "XAUUSD".to_string(),
            direction: Direction::Buy,
            entry: 2002.0,
            sl: 1995.0,
            tp: 2009.0,
            lot: 0.10,
            strategy: "LOGIC1_PROFIT_L1".to_string(),
            kind: OrderKind::ProfitTrail,
            chain_id: None,
            chain_level: 0,
            state: TradeState::Open,
            opened_at: chrono::Utc::now().to_rfc3339(),
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
        }
    }

    fn stored_chain(chain_id: &str, level: u32) -> Chain {
        let mut chain = Chain::from_seed(
            chain_id.to_string(),
            &live_order(1),
            4,
            Schedule::from_config(&BotConfig::default().profit_booking_config),
        );
        chain.current_level = level;
        chain
    }

    fn stored_order(ticket: u64, chain_id: &str, level: u32) -> ChainOrder {
        ChainOrder {
            order_id: ticket,
            chain_id: chain_id.to_string(),
            level,
            profit_target: 20.0,
            sl_reduction_pct: 10.0,
            state: ChainOrderState::Open,
        }
    }

    #[tokio::test]
    async fn round_trip_restores_chain_identity_and_cohort() {
        let store = Arc::new(MemoryChainStore::new());
        let broker = Arc::new(MockBroker::new(10_000.0));

        let mut chain = stored_chain("PROFIT_XAUUSD_aaaaaaaa", 1);
        chain.total_profit_booked = 10.0;
        store.save_chain(&chain).unwrap();
        store
            .save_order(&stored_order(11, "PROFIT_XAUUSD_aaaaaaaa", 1))
            .unwrap();
        store
            .save_order(&stored_order(12, "PROFIT_XAUUSD_aaaaaaaa", 1))
            .unwrap();

        broker.set_open_orders(vec![live_order(11), live_order(12)]);

        let (engine, book) = engine(store.clone(), broker.clone());
        let report = recover_chains(&engine, store.as_ref(), broker.as_ref(), &book)
            .await
            .unwrap();
        assert_eq!(report.chains_recovered, 1);
        assert_eq!(report.orders_attached, 2);

        let recovered = engine.snapshot("PROFIT_XAUUSD_aaaaaaaa").await.unwrap();
        assert_eq!(recovered.symbol, "XAUUSD");
        assert_eq!(recovered.direction, Direction::Buy);
        assert_eq!(recovered.current_level, 1);
        assert_eq!(recovered.status, ChainStatus::Active);
        assert!((recovered.total_profit_booked - 10.0).abs() < 1e-12);

        let mut ids = recovered.active_order_ids.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn cohort_comes_from_broker_truth() {
        let store = Arc::new(MemoryChainStore::new());
        let broker = Arc::new(MockBroker::new(10_000.0));

        store
            .save_chain(&stored_chain("PROFIT_XAUUSD_bbbbbbbb", 1))
            .unwrap();
        // Two rows persisted, but only one order survived at the broker.
        store
            .save_order(&stored_order(21, "PROFIT_XAUUSD_bbbbbbbb", 1))
            .unwrap();
        store
            .save_order(&stored_order(22, "PROFIT_XAUUSD_bbbbbbbb", 1))
            .unwrap();
        broker.set_open_orders(vec![live_order(21)]);

        let (engine, book) = engine(store.clone(), broker.clone());
        let report = recover_chains(&engine, store.as_ref(), broker.as_ref(), &book)
            .await
            .unwrap();

        assert_eq!(report.orders_attached, 1);
        let recovered = engine.snapshot("PROFIT_XAUUSD_bbbbbbbb").await.unwrap();
        assert_eq!(recovered.active_order_ids, vec![21]);

        let open = book.snapshot_open();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].chain_id.as_deref(), Some("PROFIT_XAUUSD_bbbbbbbb"));
        assert_eq!(open[0].chain_level, 1);
    }

    #[tokio::test]
    async fn orphaned_orders_get_their_tags_cleared() {
        let store = Arc::new(MemoryChainStore::new());
        let broker = Arc::new(MockBroker::new(10_000.0));

        // C1 is active; C2 exists only as a stopped row plus an OPEN order row.
        store
            .save_chain(&stored_chain("PROFIT_XAUUSD_c1c1c1c1", 1))
            .unwrap();
        let mut stopped = stored_chain("PROFIT_XAUUSD_c2c2c2c2", 2);
        stopped.status = ChainStatus::Stopped;
        store.save_chain(&stopped).unwrap();

        store
            .save_order(&stored_order(31, "PROFIT_XAUUSD_c1c1c1c1", 1))
            .unwrap();
        store
            .save_order(&stored_order(32, "PROFIT_XAUUSD_c2c2c2c2", 2))
            .unwrap();
        broker.set_open_orders(vec![live_order(31), live_order(32)]);

        let (engine, book) = engine(store.clone(), broker.clone());
        let report = recover_chains(&engine, store.as_ref(), broker.as_ref(), &book)
            .await
            .unwrap();

        assert_eq!(report.chains_recovered, 1);
        assert_eq!(report.orphans_cleared, 1);

        // Post-reconciliation no open trade carries a tag outside the map.
        let registered: std::collections::HashSet<String> =
            engine.chain_ids().into_iter().collect();
        for trade in book.snapshot_open() {
            if let Some(chain_id) = &trade.chain_id {
                assert!(registered.contains(chain_id));
            }
        }
    }

    #[tokio::test]
    async fn stale_level_orders_are_not_adopted() {
        let store = Arc::new(MemoryChainStore::new());
        let broker = Arc::new(MockBroker::new(10_000.0));

        // Chain is at level 2; one leftover order row from level 1 is still
        // open at the broker (crash mid-level-up).
        store
            .save_chain(&stored_chain("PROFIT_XAUUSD_dddddddd", 2))
            .unwrap();
        store
            .save_order(&stored_order(41, "PROFIT_XAUUSD_dddddddd", 1))
            .unwrap();
        store
            .save_order(&stored_order(42, "PROFIT_XAUUSD_dddddddd", 2))
            .unwrap();
        broker.set_open_orders(vec![live_order(41), live_order(42)]);

        let (engine, book) = engine(store.clone(), broker.clone());
        let report = recover_chains(&engine, store.as_ref(), broker.as_ref(), &book)
            .await
            .unwrap();

        assert_eq!(report.stale_level_orders, 1);
        assert_eq!(report.orders_attached, 1);
        let recovered = engine.snapshot("PROFIT_XAUUSD_dddddddd").await.unwrap();
        assert_eq!(recovered.active_order_ids, vec![42]);
    }

    #[tokio::test]
    async fn schedule_is_loaded_from_the_row_not_the_config() {
        let store = Arc::new(MemoryChainStore::new());
        let broker = Arc::new(MockBroker::new(10_000.0));

        let mut chain = stored_chain("PROFIT_XAUUSD_eeeeeeee", 0);
        // A schedule that differs from today's config defaults.
        chain.schedule.profit_targets = vec![5.0, 11.0, 23.0, 47.0, 95.0];
        store.save_chain(&chain).unwrap();
        broker.set_open_orders(vec![]);

        let (engine, book) = engine(store.clone(), broker.clone());
        recover_chains(&engine, store.as_ref(), broker.as_ref(), &book)
            .await
            .unwrap();

        let recovered = engine.snapshot("PROFIT_XAUUSD_eeeeeeee").await.unwrap();
        assert!((recovered.schedule.target(0) - 5.0).abs() < 1e-12);
        assert!((recovered.schedule.target(4) - 95.0).abs() < 1e-12);
    }
}
