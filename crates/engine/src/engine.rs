//! The replicated KV engine.
//!
//! Callers serialize access through one engine lock (the fabric wraps the
//! engine in a mutex); internally the engine may take the ring read lock and
//! the page-manager lock, never the reverse. Liveness is queried through the
//! [`LivenessView`] capability so the engine never holds a reference to the
//! whole gossip fabric.

use crate::hints::HintMap;
use crate::item::DataItem;
use crate::vclock::{ClockOrder, VectorClock};
use gossipkv_common::NodeId;
use gossipkv_ring::{HashRing, RingError};
use gossipkv_storage::PageStore;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] gossipkv_storage::StorageError),
}

/// Liveness query capability, backed by the gossip peer table.
pub trait LivenessView: Send + Sync {
    fn is_alive(&self, node_id: &NodeId) -> bool;
}

/// Outcome of a `put`.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The write landed in the data map; the clock is the item's new version.
    Stored { clock: VectorClock },
    /// The owning node is down; the write was buffered as a hint.
    Hinted { target: NodeId },
}

/// Outcome of a `reconcile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local version existed; the incoming one was inserted.
    Inserted,
    /// Local version causally follows the incoming one; nothing changed.
    KeptLocal,
    /// Incoming version causally follows the local one; it replaced it.
    TookIncoming,
    /// Versions were concurrent (or equal); values and clocks were merged.
    Merged,
}

/// A successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub value: String,
    /// `None` when the value came from the disk fallback path, which does
    /// not carry clocks.
    pub clock: Option<VectorClock>,
}

/// The KV engine: data map, hint map, paged persistence.
pub struct KvEngine {
    node_id: NodeId,
    data: HashMap<String, DataItem>,
    hints: HintMap,
    ring: Arc<RwLock<HashRing>>,
    store: PageStore,
    liveness: Arc<dyn LivenessView>,
    data_path: PathBuf,
}

impl std::fmt::Debug for KvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEngine")
            .field("node_id", &self.node_id)
            .field("keys", &self.data.len())
            .field("pending_hints", &self.hints.len())
            .finish_non_exhaustive()
    }
}

impl KvEngine {
    /// Open the engine inside `data_dir`, recovering the data map, the hint
    /// map and the page index from previous runs.
    pub fn open(
        node_id: NodeId,
        data_dir: &std::path::Path,
        ring: Arc<RwLock<HashRing>>,
        liveness: Arc<dyn LivenessView>,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(data_dir)?;
        let data_path = data_dir.join(format!("{}_data.json", node_id));
        let hint_path = data_dir.join(format!("{}_hint.json", node_id));

        let data = Self::load_data(&data_path)?;
        let hints = HintMap::load(&hint_path)?;
        let store = PageStore::open(data_dir)?;

        tracing::info!(
            "kv engine opened for {}: {} key(s), {} pending hint(s)",
            node_id,
            data.len(),
            hints.len()
        );

        Ok(Self {
            node_id,
            data,
            hints,
            ring,
            store,
            liveness,
            data_path,
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Write `key = value`. If the owning node is down the write is accepted
    /// as a hint instead of landing in the data map.
    pub fn put(&mut self, key: &str, value: &str) -> Result<PutOutcome, EngineError> {
        let target = self.owner(key)?;

        if !self.liveness.is_alive(&target) {
            tracing::debug!("owner {} for '{}' is down, hinting", target, key);
            self.hints.store(key, value, target.clone());
            gossipkv_metrics::metrics().hints_stored.inc();
            return Ok(PutOutcome::Hinted { target });
        }

        let item = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| DataItem::new("", VectorClock::new()));
        item.clock.increment(&self.node_id);
        item.value = value.to_string();
        item.deleted = false;
        let clock = item.clock.clone();

        self.write_record(key, value);
        self.persist_data();
        gossipkv_metrics::metrics().kv_puts.inc();
        Ok(PutOutcome::Stored { clock })
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Read `key`. Memory is authoritative while the owner is alive; the
    /// paged disk index answers otherwise, without clock information.
    pub fn get(&self, key: &str) -> Result<Option<Lookup>, EngineError> {
        let target = self.owner(key)?;
        gossipkv_metrics::metrics().kv_gets.inc();

        if let Some(item) = self.data.get(key) {
            if item.deleted {
                return Ok(None);
            }
            if self.liveness.is_alive(&target) {
                return Ok(Some(Lookup {
                    value: item.value.clone(),
                    clock: Some(item.clock.clone()),
                }));
            }
        }

        match self.store.read_value(key) {
            Ok(Some(value)) => Ok(Some(Lookup { value, clock: None })),
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!("disk fallback for '{}' failed: {}", key, e);
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // DELETE
    // -----------------------------------------------------------------------

    /// Delete `key` by writing a tombstone with a bumped clock. Reads stop
    /// seeing the key; reconciliation orders the tombstone like any write.
    pub fn delete(&mut self, key: &str) -> Result<VectorClock, EngineError> {
        let item = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| DataItem::new("", VectorClock::new()));
        item.clock.increment(&self.node_id);
        item.value.clear();
        item.deleted = true;
        let clock = item.clock.clone();

        self.persist_data();
        gossipkv_metrics::metrics().kv_deletes.inc();
        Ok(clock)
    }

    // -----------------------------------------------------------------------
    // RECONCILE
    // -----------------------------------------------------------------------

    /// Apply a remote version of `key`. Causally ordered versions win
    /// outright; concurrent ones merge values (`"local | incoming"`, equal
    /// strings collapse) and merge the clocks element-wise.
    pub fn reconcile(
        &mut self,
        key: &str,
        incoming_value: &str,
        incoming_clock: VectorClock,
        incoming_deleted: bool,
    ) -> Result<ReconcileOutcome, EngineError> {
        gossipkv_metrics::metrics().reconciles.inc();

        let order = match self.data.get(key) {
            None => {
                let item = if incoming_deleted {
                    DataItem::tombstone(incoming_clock)
                } else {
                    DataItem::new(incoming_value, incoming_clock)
                };
                if !item.deleted {
                    self.write_record(key, incoming_value);
                }
                self.data.insert(key.to_string(), item);
                self.persist_data();
                tracing::debug!("reconcile inserted '{}'", key);
                return Ok(ReconcileOutcome::Inserted);
            }
            Some(local) => local.clock.compare(&incoming_clock),
        };

        match order {
            ClockOrder::Greater => {
                tracing::debug!("reconcile '{}': local is newer, keeping", key);
                Ok(ReconcileOutcome::KeptLocal)
            }
            ClockOrder::Less => {
                let item = if incoming_deleted {
                    DataItem::tombstone(incoming_clock)
                } else {
                    DataItem::new(incoming_value, incoming_clock)
                };
                if !item.deleted {
                    self.write_record(key, incoming_value);
                }
                self.data.insert(key.to_string(), item);
                self.persist_data();
                tracing::debug!("reconcile '{}': took incoming version", key);
                Ok(ReconcileOutcome::TookIncoming)
            }
            ClockOrder::Equal | ClockOrder::Concurrent => {
                // Deterministic union: a concurrent live write revives a
                // tombstone; two tombstones stay one.
                let local = &self.data[key];
                let deleted = local.deleted && incoming_deleted;
                let value = if deleted {
                    String::new()
                } else if local.deleted {
                    incoming_value.to_string()
                } else if incoming_deleted {
                    local.value.clone()
                } else {
                    merge_values(&local.value, incoming_value)
                };
                let mut clock = local.clock.clone();
                clock.merge(&incoming_clock);

                if !deleted {
                    self.write_record(key, &value);
                }
                self.data.insert(
                    key.to_string(),
                    DataItem {
                        value,
                        clock,
                        deleted,
                    },
                );
                self.persist_data();
                gossipkv_metrics::metrics().conflicts_merged.inc();
                tracing::debug!("reconcile '{}': merged concurrent versions", key);
                Ok(ReconcileOutcome::Merged)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hinted handoff
    // -----------------------------------------------------------------------

    /// One drain cycle: replay every hint whose target is alive again as a
    /// fresh local write with a new clock, and drop the hint. Returns the
    /// number of hints delivered.
    pub fn drain_hints(&mut self) -> usize {
        let due: Vec<_> = self
            .hints
            .pending()
            .into_iter()
            .filter(|h| self.liveness.is_alive(&h.target))
            .collect();

        if due.is_empty() {
            return 0;
        }

        for hint in &due {
            let mut clock = VectorClock::new();
            clock.increment(&self.node_id);
            self.data
                .insert(hint.key.clone(), DataItem::new(hint.value.clone(), clock));
            self.write_record(&hint.key, &hint.value);
            self.hints.remove(&hint.key);
            tracing::info!(
                "hint for '{}' delivered, target {} is back",
                hint.key,
                hint.target
            );
        }
        self.persist_data();
        gossipkv_metrics::metrics()
            .hints_delivered
            .inc_by(due.len() as u64);
        due.len()
    }

    /// Number of pending hints.
    pub fn pending_hints(&self) -> usize {
        self.hints.len()
    }

    /// The pending hint for `key`, if any.
    pub fn hint_for(&self, key: &str) -> Option<crate::hints::Hint> {
        self.hints.get(key).cloned()
    }

    /// Number of distinct keys (tombstones included).
    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn owner(&self, key: &str) -> Result<NodeId, RingError> {
        self.ring.read().expect("ring lock poisoned").get_node(key)
    }

    /// Append a page record. Persistence failures are logged; the in-memory
    /// write already succeeded.
    fn write_record(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.append_record(key, value) {
            tracing::warn!("page write for '{}' failed: {}", key, e);
        }
    }

    /// Rewrite the data file. Failures are logged, not propagated.
    fn persist_data(&self) {
        match File::create(&self.data_path) {
            Ok(file) => {
                if let Err(e) = serde_json::to_writer(file, &self.data) {
                    tracing::warn!("failed to persist data file {:?}: {}", self.data_path, e);
                }
            }
            Err(e) => {
                tracing::warn!("failed to create data file {:?}: {}", self.data_path, e);
            }
        }
    }

    fn load_data(path: &std::path::Path) -> Result<HashMap<String, DataItem>, EngineError> {
        match File::open(path) {
            Ok(file) => Ok(serde_json::from_reader(file).unwrap_or_else(|e| {
                tracing::warn!("data file {:?} unreadable, starting empty: {}", path, e);
                HashMap::new()
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

fn merge_values(local: &str, incoming: &str) -> String {
    if local == incoming {
        local.to_string()
    } else {
        format!("{} | {}", local, incoming)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
