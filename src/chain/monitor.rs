// =============================================================================
// Chain Monitor Loop — periodic tick over every registered chain
// =============================================================================
//
// Runs as a background Tokio task, waking on a fixed interval to invoke the
// engine's tick for each chain. Chains are processed independently; a failed
// tick is logged and never stops the loop or the other chains. Terminal
// chains are cheap no-ops inside the engine.
//
// The monitor is designed to be spawned once at engine startup:
//
//   tokio::spawn(run_chain_monitor(Arc::clone(&engine)));
//
// =============================================================================

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::chain::engine::ChainEngine;

/// Interval at which every chain is re-evaluated. Must stay comfortably above
/// a typical broker round-trip, since the per-chain lock is held across
/// broker calls during a level-up.
const MONITOR_INTERVAL_SECS: u64 = 5;

/// Run the chain monitor loop. This function runs forever and should be
/// spawned as a background Tokio task.
pub async fn run_chain_monitor(engine: Arc<ChainEngine>) {
    info!(
        interval_secs = MONITOR_INTERVAL_SECS,
        "chain monitor started"
    );

    let mut ticker = interval(Duration::from_secs(MONITOR_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        let chain_ids = engine.chain_ids();
        if chain_ids.is_empty() {
            debug!("chain monitor: no chains registered");
            continue;
        }

        debug!(count = chain_ids.len(), "chain monitor: evaluating chains");

        for chain_id in chain_ids {
            if let Err(e) = engine.tick(&chain_id).await {
                warn!(chain_id = %chain_id, error = %e, "chain tick failed");
            }
        }
    }
}
