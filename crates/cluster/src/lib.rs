//! gossipkv-cluster: gossip membership, failure detection, bully election
//! and client-operation routing.
//!
//! The fabric owns the peer table and all ring mutations; the KV engine is
//! driven through its mutex and observes peer liveness through the
//! [`peer::LocalLiveness`] capability, never through the fabric itself.

pub mod fabric;
pub mod peer;

pub use fabric::{Cluster, ClusterConfig};
pub use peer::{LocalLiveness, Peer, PeerTable};
