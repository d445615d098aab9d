// =============================================================================
// Profit-booking chains — state, persistence, evaluation, engine, recovery
// =============================================================================

pub mod engine;
pub mod monitor;
pub mod pnl;
pub mod recovery;
pub mod state;
pub mod store;

pub use engine::ChainEngine;
pub use state::{Chain, ChainOrder, ChainOrderState, ChainStatus, ProgressionEvent, Schedule};
pub use store::{ChainStore, JsonChainStore, MemoryChainStore};
