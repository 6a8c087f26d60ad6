//! The peer table: every node this node knows about, with liveness state.

use gossipkv_common::{now_ms, NodeId};
use gossipkv_engine::LivenessView;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A known peer node. `Unknown → Alive ↔ Dead`; there is no suspect state.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: NodeId,
    pub addr: String,
    pub alive: bool,
    /// Last liveness observation, millis since epoch.
    pub last_check: u64,
}

impl Peer {
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            alive: true,
            last_check: now_ms(),
        }
    }
}

/// Concurrent map of peers, keyed by node id. All mutations go through this
/// table's lock; readers (the engine's liveness probe is the hot one) take
/// it briefly and never across I/O.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<NodeId, Peer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: Peer) {
        self.write().insert(peer.id.clone(), peer);
    }

    pub fn remove(&self, id: &NodeId) -> Option<Peer> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<Peer> {
        self.read().get(id).cloned()
    }

    /// All peers, sorted by id for stable display.
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.read().values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Mark a peer alive and touch its `last_check`. Returns `false` for
    /// unknown ids — messages never create peers, only `insert` does.
    pub fn mark_alive(&self, id: &NodeId) -> bool {
        match self.write().get_mut(id) {
            Some(peer) => {
                peer.alive = true;
                peer.last_check = now_ms();
                true
            }
            None => false,
        }
    }

    /// Mark a peer dead. Returns `false` for unknown ids.
    pub fn mark_dead(&self, id: &NodeId) -> bool {
        match self.write().get_mut(id) {
            Some(peer) => {
                peer.alive = false;
                peer.last_check = now_ms();
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, id: &NodeId) -> bool {
        self.read().get(id).map(|p| p.alive).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NodeId, Peer>> {
        self.peers.read().expect("peer table lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NodeId, Peer>> {
        self.peers.write().expect("peer table lock poisoned")
    }
}

/// Liveness capability handed to the KV engine: the local node is always
/// alive; everything else is answered from the peer table.
#[derive(Debug, Clone)]
pub struct LocalLiveness {
    local_id: NodeId,
    peers: Arc<PeerTable>,
}

impl LocalLiveness {
    pub fn new(local_id: NodeId, peers: Arc<PeerTable>) -> Self {
        Self { local_id, peers }
    }
}

impl LivenessView for LocalLiveness {
    fn is_alive(&self, node_id: &NodeId) -> bool {
        *node_id == self.local_id || self.peers.is_alive(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let table = PeerTable::new();
        table.insert(Peer::new(NodeId::new("n2"), "127.0.0.1:8082"));

        let peer = table.get(&NodeId::new("n2")).unwrap();
        assert_eq!(peer.addr, "127.0.0.1:8082");
        assert!(peer.alive);
        assert!(table.is_alive(&NodeId::new("n2")));
        assert!(!table.is_alive(&NodeId::new("n9")));
    }

    #[test]
    fn test_mark_dead_and_back() {
        let table = PeerTable::new();
        table.insert(Peer::new(NodeId::new("n2"), "127.0.0.1:8082"));

        assert!(table.mark_dead(&NodeId::new("n2")));
        assert!(!table.is_alive(&NodeId::new("n2")));

        assert!(table.mark_alive(&NodeId::new("n2")));
        assert!(table.is_alive(&NodeId::new("n2")));
    }

    #[test]
    fn test_messages_do_not_create_peers() {
        let table = PeerTable::new();
        assert!(!table.mark_alive(&NodeId::new("stranger")));
        assert!(!table.mark_dead(&NodeId::new("stranger")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_sorted_by_id() {
        let table = PeerTable::new();
        table.insert(Peer::new(NodeId::new("n3"), "c"));
        table.insert(Peer::new(NodeId::new("n1"), "a"));
        table.insert(Peer::new(NodeId::new("n2"), "b"));

        let ids: Vec<String> = table
            .snapshot()
            .iter()
            .map(|p| p.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_mark_alive_touches_last_check() {
        let table = PeerTable::new();
        let mut stale = Peer::new(NodeId::new("n2"), "addr");
        stale.last_check = 0;
        stale.alive = false;
        table.insert(stale);

        table.mark_alive(&NodeId::new("n2"));
        assert!(table.get(&NodeId::new("n2")).unwrap().last_check > 0);
    }

    #[test]
    fn test_local_liveness_always_alive_for_self() {
        let table = Arc::new(PeerTable::new());
        let liveness = LocalLiveness::new(NodeId::new("n1"), table.clone());

        assert!(liveness.is_alive(&NodeId::new("n1")));
        assert!(!liveness.is_alive(&NodeId::new("n2")));

        table.insert(Peer::new(NodeId::new("n2"), "addr"));
        assert!(liveness.is_alive(&NodeId::new("n2")));
        table.mark_dead(&NodeId::new("n2"));
        assert!(!liveness.is_alive(&NodeId::new("n2")));
    }
}
