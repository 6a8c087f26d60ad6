//! The gossip fabric: failure detection, bully election, message dispatch
//! and client-operation routing.
//!
//! Generic over `T: Transport` for testability — real deployments use
//! `TcpTransport`; unit tests use mocks.

use crate::peer::{Peer, PeerTable};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use gossipkv_common::NodeId;
use gossipkv_engine::{EngineError, KvEngine, Lookup, PutOutcome, VectorClock};
use gossipkv_ring::{HashRing, RingError};
use gossipkv_wire::{DataGossip, Message, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

/// Fabric tuning knobs.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Ping round interval.
    pub tick_interval: Duration,
    /// Replica set size for write propagation.
    pub replicas: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            replicas: 3,
        }
    }
}

/// The gossip fabric. Owns the peer table and ring mutations; routes client
/// operations into the KV engine.
pub struct Cluster<T: Transport> {
    local_id: NodeId,
    local_addr: String,
    peers: Arc<PeerTable>,
    ring: Arc<StdRwLock<HashRing>>,
    engine: Arc<Mutex<KvEngine>>,
    transport: Arc<T>,
    coordinator: StdMutex<Option<NodeId>>,
    election_running: AtomicBool,
    config: ClusterConfig,
}

impl<T: Transport> std::fmt::Debug for Cluster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("local_id", &self.local_id)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Cluster<T> {
    /// Build the fabric. The ring is expected to already contain the local
    /// node; peers arrive through [`Cluster::add_node`].
    pub fn new(
        local_id: NodeId,
        local_addr: impl Into<String>,
        peers: Arc<PeerTable>,
        ring: Arc<StdRwLock<HashRing>>,
        engine: Arc<Mutex<KvEngine>>,
        transport: Arc<T>,
        config: ClusterConfig,
    ) -> Self {
        Self {
            local_id,
            local_addr: local_addr.into(),
            peers,
            ring,
            engine,
            transport,
            coordinator: StdMutex::new(None),
            election_running: AtomicBool::new(false),
            config,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn engine(&self) -> &Arc<Mutex<KvEngine>> {
        &self.engine
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
            .lock()
            .expect("coordinator lock poisoned")
            .clone()
    }

    fn set_coordinator(&self, id: NodeId) {
        *self
            .coordinator
            .lock()
            .expect("coordinator lock poisoned") = Some(id);
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Learn a peer: insert it into the table and onto the ring.
    pub fn add_node(&self, id: NodeId, addr: impl Into<String>) {
        let addr = addr.into();
        tracing::info!("adding node {} at {}", id, addr);
        self.peers.insert(Peer::new(id.clone(), addr));
        self.ring
            .write()
            .expect("ring lock poisoned")
            .add_node(&id);
    }

    /// Forget a peer: drop it from the table and the ring.
    pub fn remove_node(&self, id: &NodeId) {
        tracing::info!("removing node {}", id);
        self.peers.remove(id);
        self.ring
            .write()
            .expect("ring lock poisoned")
            .remove_node(id);
    }

    pub fn is_alive(&self, id: &NodeId) -> bool {
        self.peers.is_alive(id)
    }

    /// Peer list for display, sorted by id.
    pub fn nodes(&self) -> Vec<Peer> {
        self.peers.snapshot()
    }

    pub fn get_node_for_key(&self, key: &str) -> Result<NodeId, RingError> {
        self.ring
            .read()
            .expect("ring lock poisoned")
            .get_node(key)
    }

    // -----------------------------------------------------------------------
    // Client operation routing
    // -----------------------------------------------------------------------

    /// Route a client `put` into the engine; live writes are pushed to the
    /// key's replica set best-effort.
    pub async fn put(&self, key: &str, value: &str) -> Result<PutOutcome, EngineError> {
        let _timer = gossipkv_metrics::kv_timer("put");
        let outcome = self.engine.lock().await.put(key, value)?;
        if let PutOutcome::Stored { clock } = &outcome {
            self.propagate(key, value.to_string(), clock.clone(), false);
        }
        Ok(outcome)
    }

    /// Route a client `get` into the engine.
    pub async fn get(&self, key: &str) -> Result<Option<Lookup>, EngineError> {
        let _timer = gossipkv_metrics::kv_timer("get");
        self.engine.lock().await.get(key)
    }

    /// Route a client `delete`: the engine writes a tombstone, which is then
    /// propagated like any other versioned write.
    pub async fn delete(&self, key: &str) -> Result<VectorClock, EngineError> {
        let _timer = gossipkv_metrics::kv_timer("delete");
        let clock = self.engine.lock().await.delete(key)?;
        self.propagate(key, String::new(), clock.clone(), true);
        Ok(clock)
    }

    /// Push a versioned write to the other members of the key's replica set.
    /// Failures are logged and dropped; reconciliation and handoff cover the
    /// gaps.
    fn propagate(&self, key: &str, value: String, clock: VectorClock, deleted: bool) {
        let replicas = {
            let ring = self.ring.read().expect("ring lock poisoned");
            ring.get_nodes(key, self.config.replicas).unwrap_or_default()
        };

        let data = DataGossip {
            key: key.to_string(),
            value,
            vector_clock: clock.into_map(),
            node_id: self.local_id.clone(),
            deleted,
        };

        for target in replicas.into_iter().filter(|id| *id != self.local_id) {
            let Some(peer) = self.peers.get(&target) else {
                continue;
            };
            let transport = self.transport.clone();
            let msg = Message::Data(data.clone());
            tokio::spawn(async move {
                if let Err(e) = transport.send(&peer.addr, &msg).await {
                    tracing::debug!("replica push to {} failed: {}", peer.id, e);
                }
            });
        }
    }

    // -----------------------------------------------------------------------
    // Failure detection
    // -----------------------------------------------------------------------

    /// Run the outbound gossip loop forever.
    pub async fn run_gossip(self: Arc<Self>) {
        let mut tick = interval(self.config.tick_interval);
        loop {
            tick.tick().await;
            self.clone().tick().await;
        }
    }

    /// One ping round: probe every known peer in parallel and fold the
    /// results back into the peer table. A dead coordinator triggers an
    /// election.
    pub async fn tick(self: Arc<Self>) {
        let peers = self.peers.snapshot();
        let mut probes = Vec::with_capacity(peers.len());

        for peer in peers {
            let this = self.clone();
            probes.push(tokio::spawn(async move {
                this.probe(peer).await;
            }));
        }
        for probe in probes {
            let _ = probe.await;
        }
    }

    async fn probe(self: Arc<Self>, peer: Peer) {
        let msg = Message::Ping {
            from: self.local_id.clone(),
        };
        gossipkv_metrics::metrics().pings_sent.inc();

        match self.transport.send(&peer.addr, &msg).await {
            Ok(()) => {
                self.peers.mark_alive(&peer.id);
            }
            Err(e) => {
                gossipkv_metrics::metrics().ping_failures.inc();
                let newly_dead = peer.alive;
                self.peers.mark_dead(&peer.id);
                if newly_dead {
                    tracing::warn!("peer {} is down: {}", peer.id, e);
                }
                if self.coordinator() == Some(peer.id.clone()) {
                    tracing::info!("coordinator {} is down, starting election", peer.id);
                    self.clone().initiate_election().await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bully election
    // -----------------------------------------------------------------------

    /// Start a bully election. Re-entrant calls while one is running are
    /// no-ops.
    pub async fn initiate_election(self: Arc<Self>) {
        if self.election_running.swap(true, Ordering::SeqCst) {
            tracing::debug!("election already in progress");
            return;
        }
        gossipkv_metrics::metrics().elections_started.inc();
        tracing::info!("{} initiating election", self.local_id);

        let higher: Vec<Peer> = self
            .peers
            .snapshot()
            .into_iter()
            .filter(|p| p.alive && p.id > self.local_id)
            .collect();

        if higher.is_empty() {
            self.become_coordinator().await;
        } else {
            let mut challenges: FuturesUnordered<_> = higher
                .iter()
                .map(|p| self.transport.send_election(&p.addr, &self.local_id))
                .collect();

            let mut answered = false;
            while let Some(result) = challenges.next().await {
                if matches!(result, Ok(true)) {
                    answered = true;
                    break;
                }
            }
            drop(challenges);

            if answered {
                tracing::info!("{} deferring election to a higher node", self.local_id);
            } else {
                self.become_coordinator().await;
            }
        }

        self.election_running.store(false, Ordering::SeqCst);
    }

    /// Claim coordinatorship and announce it to every peer.
    async fn become_coordinator(&self) {
        self.set_coordinator(self.local_id.clone());
        tracing::info!("{} is now coordinator", self.local_id);
        gossipkv_metrics::metrics().coordinator_announcements.inc();

        let msg = Message::Coordinator {
            id: self.local_id.clone(),
        };
        for peer in self.peers.snapshot() {
            if let Err(e) = self.transport.send(&peer.addr, &msg).await {
                tracing::debug!("coordinator announce to {} failed: {}", peer.id, e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Accept inbound gossip connections forever. Each connection carries a
    /// single message.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        tracing::info!("{} listening on {}", self.local_id, self.local_addr);
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.handle_conn(stream).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                }
            }
        }
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut line = String::new();
        match BufReader::new(read_half).read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        match Message::parse(&line) {
            Ok(msg) => {
                if let Some(reply) = self.clone().handle_message(msg).await {
                    let _ = write_half.write_all(reply.encode().as_bytes()).await;
                }
            }
            Err(e) => {
                // Drop the connection; no peer-state change.
                tracing::debug!("dropping undecodable message: {}", e);
            }
        }
    }

    /// Dispatch one inbound message; the return value is the reply to write
    /// back on the same connection, if any.
    pub async fn handle_message(self: Arc<Self>, msg: Message) -> Option<Message> {
        match msg {
            Message::Ping { from } => {
                if !self.peers.mark_alive(&from) {
                    tracing::debug!("ping from unknown peer {}", from);
                }
                None
            }
            Message::Election { from } => {
                // A lower node challenged us: acknowledge, then run our own
                // election.
                tracing::debug!("election challenge from {}", from);
                self.peers.mark_alive(&from);
                let this = self.clone();
                tokio::spawn(async move {
                    this.initiate_election().await;
                });
                Some(Message::ElectionOk)
            }
            Message::Coordinator { id } => {
                tracing::info!("{} accepts coordinator {}", self.local_id, id);
                self.peers.mark_alive(&id);
                self.set_coordinator(id);
                None
            }
            Message::Data(data) => {
                let clock = VectorClock::from_map(data.vector_clock);
                let result = self
                    .engine
                    .lock()
                    .await
                    .reconcile(&data.key, &data.value, clock, data.deleted);
                if let Err(e) = result {
                    tracing::warn!("reconcile for '{}' failed: {}", data.key, e);
                }
                None
            }
            Message::ElectionOk => None, // stray reply, nothing to do
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
