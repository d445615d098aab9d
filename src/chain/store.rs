// =============================================================================
// Chain Store — durable persistence for chains, orders, and events
// =============================================================================
//
// Three logical tables behind one backend-agnostic trait:
//   chains        upsert by chain_id
//   chain_orders  upsert by order_id
//   chain_events  append-only
//
// The JSON backend keeps the two upsert tables as whole-file documents with
// atomic tmp + rename writes, and the event log as a jsonl append file. A
// save that returns Ok has reached the filesystem before any broker action
// that depends on it is attempted (the engine orders its calls that way).
// =============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::chain::state::{Chain, ChainOrder, ChainOrderState, ChainStatus, ProgressionEvent};

/// Backend-agnostic persistence contract for the chain engine.
pub trait ChainStore: Send + Sync {
    /// Upsert one chain row. Atomic with respect to that chain.
    fn save_chain(&self, chain: &Chain) -> Result<()>;

    /// Upsert one order row.
    fn save_order(&self, order: &ChainOrder) -> Result<()>;

    /// Append one progression event.
    fn append_event(&self, event: &ProgressionEvent) -> Result<()>;

    /// All chains with status ACTIVE.
    fn load_active_chains(&self) -> Result<Vec<Chain>>;

    /// Order rows for one chain in the given state.
    fn load_orders_for_chain(&self, chain_id: &str, state: ChainOrderState)
        -> Result<Vec<ChainOrder>>;

    /// All order rows currently in state OPEN, across every chain. Used by
    /// startup reconciliation to re-tag broker orders.
    fn load_open_orders(&self) -> Result<Vec<ChainOrder>>;
}

// =============================================================================
// JSON file backend
// =============================================================================

#[derive(Default)]
struct Tables {
    chains: BTreeMap<String, Chain>,
    orders: BTreeMap<u64, ChainOrder>,
}

/// File-backed store rooted at a data directory.
pub struct JsonChainStore {
    dir: PathBuf,
    tables: RwLock<Tables>,
}

impl JsonChainStore {
    /// Open (or initialise) the store under `dir`.
    ///
    /// Missing files mean an empty table; unreadable files are an error, not
    /// a silent reset — the store is the durability backbone.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store dir {}", dir.display()))?;

        let chains: BTreeMap<String, Chain> = read_table(&dir.join("chains.json"))?;
        let orders: BTreeMap<u64, ChainOrder> = read_table(&dir.join("chain_orders.json"))?;

        info!(
            dir = %dir.display(),
            chains = chains.len(),
            orders = orders.len(),
            "chain store opened"
        );

        Ok(Self {
            dir,
            tables: RwLock::new(Tables { chains, orders }),
        })
    }

    fn chains_path(&self) -> PathBuf {
        self.dir.join("chains.json")
    }

    fn orders_path(&self) -> PathBuf {
        self.dir.join("chain_orders.json")
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join("chain_events.jsonl")
    }
}

/// Load one whole-file table, treating a missing file as empty.
fn read_table<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("failed to parse store table {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read store table {}", path.display())),
    }
}

/// Atomic tmp + rename write of one whole-file table.
fn write_table<T: serde::Serialize>(path: &Path, table: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(table)
        .with_context(|| format!("failed to serialise store table {}", path.display()))?;
    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp table to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp table to {}", path.display()))?;
    Ok(())
}

impl ChainStore for JsonChainStore {
    fn save_chain(&self, chain: &Chain) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .chains
            .insert(chain.chain_id.clone(), chain.clone());
        write_table(&self.chains_path(), &tables.chains)
    }

    fn save_order(&self, order: &ChainOrder) -> Result<()> {
        let mut tables = self.tables.write();
        tables.orders.insert(order.order_id, order.clone());
        write_table(&self.orders_path(), &tables.orders)
    }

    fn append_event(&self, event: &ProgressionEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to serialise event")?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())
            .with_context(|| {
                format!("failed to open event log {}", self.events_path().display())
            })?;
        writeln!(file, "{line}").context("failed to append event")?;
        Ok(())
    }

    fn load_active_chains(&self) -> Result<Vec<Chain>> {
        Ok(self
            .tables
            .read()
            .chains
            .values()
            .filter(|c| c.status == ChainStatus::Active)
            .cloned()
            .collect())
    }

    fn load_orders_for_chain(
        &self,
        chain_id: &str,
        state: ChainOrderState,
    ) -> Result<Vec<ChainOrder>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.chain_id == chain_id && o.state == state)
            .cloned()
            .collect())
    }

    fn load_open_orders(&self) -> Result<Vec<ChainOrder>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.state == ChainOrderState::Open)
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for JsonChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("JsonChainStore")
            .field("dir", &self.dir)
            .field("chains", &tables.chains.len())
            .field("orders", &tables.orders.len())
            .finish()
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Volatile store for tests and throwaway demo runs. Supports write-failure
/// injection so engine error paths can be exercised.
#[derive(Default)]
pub struct MemoryChainStore {
    tables: RwLock<Tables>,
    events: RwLock<Vec<ProgressionEvent>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (persistence-failure drills).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
        if fail {
            warn!("memory chain store: write failures injected");
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("injected write failure");
        }
        Ok(())
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<ProgressionEvent> {
        self.events.read().clone()
    }

    /// Direct row lookup, for assertions.
    pub fn chain(&self, chain_id: &str) -> Option<Chain> {
        self.tables.read().chains.get(chain_id).cloned()
    }

    pub fn order(&self, order_id: u64) -> Option<ChainOrder> {
        self.tables.read().orders.get(&order_id).cloned()
    }
}

impl ChainStore for MemoryChainStore {
    fn save_chain(&self, chain: &Chain) -> Result<()> {
        self.check_writable()?;
        self.tables
            .write()
            .chains
            .insert(chain.chain_id.clone(), chain.clone());
        Ok(())
    }

    fn save_order(&self, order: &ChainOrder) -> Result<()> {
        self.check_writable()?;
        self.tables.write().orders.insert(order.order_id, order.clone());
        Ok(())
    }

    fn append_event(&self, event: &ProgressionEvent) -> Result<()> {
        self.check_writable()?;
        self.events.write().push(event.clone());
        Ok(())
    }

    fn load_active_chains(&self) -> Result<Vec<Chain>> {
        Ok(self
            .tables
            .read()
            .chains
            .values()
            .filter(|c| c.status == ChainStatus::Active)
            .cloned()
            .collect())
    }

    fn load_orders_for_chain(
        &self,
        chain_id: &str,
        state: ChainOrderState,
    ) -> Result<Vec<ChainOrder>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.chain_id == chain_id && o.state == state)
            .cloned()
            .collect())
    }

    fn load_open_orders(&self) -> Result<Vec<ChainOrder>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.state == ChainOrderState::Open)
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for MemoryChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryChainStore")
            .field("chains", &tables.chains.len())
            .field("orders", &tables.orders.len())
            .field("events", &self.events.read().len())
            .finish()
    }
}
