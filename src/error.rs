// =============================================================================
// Error kinds recognised by the chain engine and its collaborators
// =============================================================================
//
// Recovery contract:
//   - PriceUnavailable / BrokerTransient are retried on later ticks (the
//     engine counts consecutive level-up failures toward fault escalation).
//   - BrokerFatal means the order is lost; the level-up continues with fewer
//     placements.
//   - Persistence aborts the current operation without mutating in-memory
//     state and propagates to the caller.
// =============================================================================

use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Timeout or network failure; worth retrying on a later tick.
    #[error("broker transient failure: {0}")]
    Transient(String),

    /// Permanent rejection from the broker; the order will never exist.
    #[error("broker rejected order (code {code}): {reason}")]
    Rejected { code: i64, reason: String },
}

impl BrokerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Errors surfaced by chain-engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Schedule or configuration violates a structural invariant. Fatal at
    /// chain creation; the chain is never registered.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// The price feed returned 0/invalid; the chain must not act this tick.
    #[error("price unavailable for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A store write failed. The operation that hit it was aborted before any
    /// in-memory mutation.
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),

    /// The target chain is not registered in the engine.
    #[error("unknown chain: {chain_id}")]
    UnknownChain { chain_id: String },
}

/// Reasons the risk governor refuses to open a new cohort.
#[derive(Debug, Error, PartialEq)]
pub enum RiskVeto {
    #[error("daily loss cap would be exceeded: ${projected:.2} > ${limit:.2}")]
    DailyLossCap { projected: f64, limit: f64 },

    #[error("lifetime loss cap would be exceeded: ${projected:.2} > ${limit:.2}")]
    LifetimeLossCap { projected: f64, limit: f64 },

    #[error("no risk tier configured for balance tier {tier}")]
    UnknownTier { tier: u64 },
}
