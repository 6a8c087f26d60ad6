//! End-to-end tests over real TCP sockets: two-node replication, the full
//! bully handshake, and hinted handoff recovery.

use gossipkv_cluster::{Cluster, ClusterConfig, LocalLiveness, PeerTable};
use gossipkv_common::NodeId;
use gossipkv_engine::{spawn_handoff_drainer, KvEngine, PutOutcome};
use gossipkv_ring::HashRing;
use gossipkv_wire::TcpTransport;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct TestNode {
    cluster: Arc<Cluster<TcpTransport>>,
    addr: String,
    _dir: TempDir,
}

/// Bind a listener, wire a full node around it and start serving.
async fn start_node(id: &str) -> TestNode {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let local_id = NodeId::new(id);
    let peers = Arc::new(PeerTable::new());
    let mut ring = HashRing::new(HashRing::DEFAULT_VNODES);
    ring.add_node(&local_id);
    let ring = Arc::new(RwLock::new(ring));

    let liveness = Arc::new(LocalLiveness::new(local_id.clone(), peers.clone()));
    let engine = KvEngine::open(local_id.clone(), dir.path(), ring.clone(), liveness).unwrap();
    let engine = Arc::new(Mutex::new(engine));

    let transport = Arc::new(TcpTransport::new(
        Duration::from_millis(500),
        Duration::from_millis(500),
    ));

    let cluster = Arc::new(Cluster::new(
        local_id,
        addr.clone(),
        peers,
        ring,
        engine,
        transport,
        ClusterConfig {
            tick_interval: Duration::from_millis(100),
            replicas: 3,
        },
    ));

    tokio::spawn(cluster.clone().serve(listener));

    TestNode {
        cluster,
        addr,
        _dir: dir,
    }
}

/// Poll until `check` returns true or a deadline passes.
async fn wait_until<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(50)).await;
    }
}

/// A port that was bound once and released: nothing listens there.
async fn unreachable_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[tokio::test]
async fn test_put_replicates_between_nodes() {
    let n1 = start_node("n1").await;
    let n2 = start_node("n2").await;

    n1.cluster.add_node(NodeId::new("n2"), n2.addr.clone());
    n2.cluster.add_node(NodeId::new("n1"), n1.addr.clone());

    let outcome = n1.cluster.put("fruit", "apple").await.unwrap();
    assert!(matches!(outcome, PutOutcome::Stored { .. }));

    wait_until(
        || {
            let cluster = n2.cluster.clone();
            async move {
                matches!(
                    cluster.get("fruit").await,
                    Ok(Some(lookup)) if lookup.value == "apple"
                )
            }
        },
        "replicated value on n2",
    )
    .await;
}

#[tokio::test]
async fn test_full_bully_handshake() {
    // a < b: a challenges b over real TCP, b answers OK and claims the
    // coordinatorship, a learns about it from b's announcement.
    let a = start_node("a").await;
    let b = start_node("b").await;

    a.cluster.add_node(NodeId::new("b"), b.addr.clone());
    b.cluster.add_node(NodeId::new("a"), a.addr.clone());

    a.cluster.clone().initiate_election().await;

    wait_until(
        || {
            let cluster = a.cluster.clone();
            async move { cluster.coordinator() == Some(NodeId::new("b")) }
        },
        "a to accept b as coordinator",
    )
    .await;
    assert_eq!(b.cluster.coordinator(), Some(NodeId::new("b")));
}

#[tokio::test]
async fn test_dead_coordinator_failover() {
    // b's coordinator c is unreachable; one ping round marks it dead and b
    // (highest live node) takes over.
    let b = start_node("b").await;

    b.cluster.add_node(NodeId::new("c"), unreachable_addr().await);
    b.cluster
        .clone()
        .handle_message(gossipkv_wire::Message::Coordinator {
            id: NodeId::new("c"),
        })
        .await;

    b.cluster.clone().tick().await;

    assert!(!b.cluster.is_alive(&NodeId::new("c")));
    assert_eq!(b.cluster.coordinator(), Some(NodeId::new("b")));
}

#[tokio::test]
async fn test_hinted_handoff_recovers_after_target_returns() {
    let n1 = start_node("n1").await;

    // n2 starts out dead at an unreachable address.
    n1.cluster.add_node(NodeId::new("n2"), unreachable_addr().await);
    n1.cluster.clone().tick().await;
    assert!(!n1.cluster.is_alive(&NodeId::new("n2")));

    // Find a key owned by the dead node so the write must be hinted.
    let hinted_key = (0..200)
        .map(|i| format!("key-{}", i))
        .find(|k| n1.cluster.get_node_for_key(k).unwrap() == NodeId::new("n2"))
        .expect("some key should map to n2");

    let outcome = n1.cluster.put(&hinted_key, "pending").await.unwrap();
    assert!(matches!(outcome, PutOutcome::Hinted { .. }));
    assert_eq!(n1.cluster.engine().lock().await.pending_hints(), 1);

    spawn_handoff_drainer(n1.cluster.engine().clone(), Duration::from_millis(100));

    // Still down: the hint stays.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(n1.cluster.engine().lock().await.pending_hints(), 1);

    // n2 comes back for real; the drainer replays the hint.
    let n2 = start_node("n2").await;
    n1.cluster.add_node(NodeId::new("n2"), n2.addr.clone());

    wait_until(
        || {
            let engine = n1.cluster.engine().clone();
            async move { engine.lock().await.pending_hints() == 0 }
        },
        "hint to drain",
    )
    .await;

    let lookup = n1.cluster.get(&hinted_key).await.unwrap().unwrap();
    assert_eq!(lookup.value, "pending");
}
