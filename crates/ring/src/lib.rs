//! Consistent hash ring with virtual nodes.
//!
//! Each physical node contributes `vnodes` entries to the ring, hashed from
//! `"{node_id}-{i}"`. A key is owned by the node at the first ring position
//! whose hash is >= the key's hash, wrapping to the start of the ring.

use gossipkv_common::{ring_hash32, NodeId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingError {
    /// `get_node` called before any node was added. A configuration failure,
    /// not a runtime condition.
    #[error("no nodes available in the hash ring")]
    Empty,
}

/// One virtual-node entry on the ring.
#[derive(Debug, Clone)]
struct VNode {
    hash: u32,
    node: NodeId,
}

/// The consistent hash ring.
///
/// Entries are kept sorted by hash ascending; lookup is a binary search for
/// the first entry at or past the key's hash.
#[derive(Debug)]
pub struct HashRing {
    vnodes_per_node: usize,
    entries: Vec<VNode>,
}

impl HashRing {
    /// Default virtual nodes per physical node.
    pub const DEFAULT_VNODES: usize = 3;

    pub fn new(vnodes_per_node: usize) -> Self {
        Self {
            vnodes_per_node,
            entries: Vec::new(),
        }
    }

    /// Add a physical node: inserts `vnodes_per_node` virtual entries and
    /// re-sorts the ring. Re-adding a node is idempotent.
    pub fn add_node(&mut self, node: &NodeId) {
        self.remove_node(node);
        for i in 0..self.vnodes_per_node {
            let hash = ring_hash32(&node.vnode_key(i));
            self.entries.push(VNode {
                hash,
                node: node.clone(),
            });
        }
        self.entries.sort_by_key(|v| v.hash);
    }

    /// Remove every virtual entry belonging to `node_id`.
    pub fn remove_node(&mut self, node_id: &NodeId) {
        self.entries.retain(|v| v.node != *node_id);
    }

    /// The owning node for `key`.
    pub fn get_node(&self, key: &str) -> Result<NodeId, RingError> {
        if self.entries.is_empty() {
            return Err(RingError::Empty);
        }
        let idx = self.successor_index(ring_hash32(key));
        Ok(self.entries[idx].node.clone())
    }

    /// Up to `n` distinct physical nodes for `key`, walking clockwise from
    /// the owner. Used for replica selection.
    pub fn get_nodes(&self, key: &str, n: usize) -> Result<Vec<NodeId>, RingError> {
        if self.entries.is_empty() {
            return Err(RingError::Empty);
        }
        let start = self.successor_index(ring_hash32(key));
        let mut nodes = Vec::with_capacity(n);
        for step in 0..self.entries.len() {
            let entry = &self.entries[(start + step) % self.entries.len()];
            if !nodes.contains(&entry.node) {
                nodes.push(entry.node.clone());
                if nodes.len() == n {
                    break;
                }
            }
        }
        Ok(nodes)
    }

    /// Number of distinct physical nodes on the ring.
    pub fn node_count(&self) -> usize {
        let mut ids: Vec<&NodeId> = self.entries.iter().map(|v| &v.node).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry with hash >= `hash`, wrapping to 0.
    fn successor_index(&self, hash: u32) -> usize {
        match self.entries.binary_search_by_key(&hash, |v| v.hash) {
            Ok(idx) => idx,
            Err(idx) if idx == self.entries.len() => 0,
            Err(idx) => idx,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
