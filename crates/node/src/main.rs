//! gossipkv-node: entry point for a gossip-replicated KV node.
//!
//! Loads config, wires the ring, the KV engine and the gossip fabric, then
//! hands control to the interactive CLI. Gossip and the inbound listener run
//! as background tasks unless `--cli-only` is given.

mod cli;

use clap::Parser;
use gossipkv_cluster::{Cluster, ClusterConfig, LocalLiveness, PeerTable};
use gossipkv_common::NodeId;
use gossipkv_config::NodeConfig;
use gossipkv_engine::{spawn_handoff_drainer, KvEngine};
use gossipkv_ring::HashRing;
use gossipkv_wire::TcpTransport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the YAML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port override (binds `127.0.0.1:<port>`).
    #[arg(long)]
    port: Option<u16>,

    /// Node id override.
    #[arg(long)]
    id: Option<String>,

    /// Run only the interactive CLI, without gossip or the listener.
    #[arg(long)]
    cli_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gossipkv_metrics::init_tracing();
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen = format!("127.0.0.1:{}", port);
    }
    if let Some(id) = &args.id {
        config.node_id = id.clone();
    }
    config.validate()?;

    let local_id = NodeId::new(config.node_id.clone());
    tracing::info!("node {} starting on {}", local_id, config.listen);

    let peers = Arc::new(PeerTable::new());
    let mut ring = HashRing::new(config.ring.vnodes);
    ring.add_node(&local_id);
    let ring = Arc::new(RwLock::new(ring));

    let liveness = Arc::new(LocalLiveness::new(local_id.clone(), peers.clone()));
    let engine = KvEngine::open(
        local_id.clone(),
        &config.storage.data_dir,
        ring.clone(),
        liveness,
    )?;
    let engine = Arc::new(Mutex::new(engine));

    let transport = Arc::new(TcpTransport::new(
        Duration::from_millis(config.gossip.dial_timeout_ms),
        Duration::from_millis(config.gossip.election_timeout_ms),
    ));

    let cluster = Arc::new(Cluster::new(
        local_id,
        config.listen.clone(),
        peers,
        ring,
        engine.clone(),
        transport,
        ClusterConfig {
            tick_interval: Duration::from_millis(config.gossip.tick_interval_ms),
            replicas: config.ring.replicas,
        },
    ));

    for peer in &config.peers {
        cluster.add_node(NodeId::new(peer.id.clone()), peer.addr.clone());
    }

    if !args.cli_only {
        let listener = TcpListener::bind(&config.listen).await?;
        tokio::spawn(cluster.clone().serve(listener));
        tokio::spawn(cluster.clone().run_gossip());
        spawn_handoff_drainer(
            engine.clone(),
            Duration::from_secs(config.kv.handoff_interval_secs),
        );
    }

    if let Some(port) = config.metrics_port {
        let scrape_addr = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            if let Err(e) = gossipkv_metrics::serve_scrape_endpoint(scrape_addr).await {
                tracing::warn!("metrics endpoint on {} exited: {}", scrape_addr, e);
            }
        });
    }

    cli::run(cluster).await?;
    Ok(())
}
