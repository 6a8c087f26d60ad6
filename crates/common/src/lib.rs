//! gossipkv-common: shared types for the gossipkv project.
//!
//! Provides the string [`NodeId`] used for membership and vector-clock
//! entries, the stable 32-bit ring hash, and wall-clock helpers.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// A cluster-unique node identifier (e.g. `"node1"`).
///
/// Ordering is lexicographic on the underlying string; the bully election
/// relies on this to pick the highest live node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ring key for virtual node `i` of this node (`"{id}-{i}"`).
    pub fn vnode_key(&self, i: usize) -> String {
        format!("{}-{}", self.0, i)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Ring hash
// ---------------------------------------------------------------------------

/// Stable 32-bit hash used for ring placement: the first four bytes of the
/// SHA-1 digest, big-endian.
///
/// Must never change across versions — key placement on disk depends on it
/// surviving restarts.
pub fn ring_hash32(data: &str) -> u32 {
    let digest = Sha1::digest(data.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Milliseconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn now_ms() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as u64,
        Err(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_hash_deterministic() {
        let h1 = ring_hash32("apple");
        let h2 = ring_hash32("apple");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_ring_hash_different_inputs() {
        assert_ne!(ring_hash32("key-a"), ring_hash32("key-b"));
    }

    #[test]
    fn test_vnode_keys_distinct() {
        let id = NodeId::new("node1");
        assert_eq!(id.vnode_key(0), "node1-0");
        assert_eq!(id.vnode_key(2), "node1-2");
        assert_ne!(ring_hash32(&id.vnode_key(0)), ring_hash32(&id.vnode_key(1)));
    }

    #[test]
    fn test_node_id_ordering_lexicographic() {
        let a = NodeId::new("node-a");
        let b = NodeId::new("node-b");
        let c = NodeId::new("node-c");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(vec![&c, &a, &b].iter().max().unwrap().as_str(), "node-c");
    }

    #[test]
    fn test_node_id_serde_transparent() {
        let id = NodeId::new("node1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"node1\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
