//! gossipkv-metrics: observability plumbing shared by every crate.
//!
//! Holds the process-wide Prometheus [`Registry`] with the counters and
//! histograms the store emits, installs the `tracing` subscriber, and can
//! expose a scrape endpoint over HTTP when a metrics port is configured.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the process-wide tracing subscriber. `RUST_LOG` selects the
/// filter; everything at `info` and above otherwise.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ---------------------------------------------------------------------------
// Metrics registry
// ---------------------------------------------------------------------------

/// Handle to the process-wide metrics, created on first use.
pub fn metrics() -> &'static Metrics {
    static INSTANCE: OnceLock<Metrics> = OnceLock::new();
    INSTANCE.get_or_init(Metrics::new)
}

/// Histogram buckets for KV latency, seconds: local map hits at the low end
/// through slow full-file rewrites at the top, spaced roughly 4x apart.
const OP_BUCKETS: &[f64] = &[0.00025, 0.001, 0.004, 0.016, 0.064, 0.25, 1.0, 4.0];

/// Every counter and histogram a node process exports.
pub struct Metrics {
    pub registry: Registry,

    // KV operations
    pub kv_puts: IntCounter,
    pub kv_gets: IntCounter,
    pub kv_deletes: IntCounter,
    pub reconciles: IntCounter,
    pub conflicts_merged: IntCounter,
    pub kv_latency_secs: HistogramVec,

    // Hinted handoff
    pub hints_stored: IntCounter,
    pub hints_delivered: IntCounter,

    // Gossip and election
    pub pings_sent: IntCounter,
    pub ping_failures: IntCounter,
    pub elections_started: IntCounter,
    pub coordinator_announcements: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Metrics({} families)", self.registry.gather().len())
    }
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            let c = IntCounter::with_opts(Opts::new(name, help)).expect("counter opts");
            registry
                .register(Box::new(c.clone()))
                .expect("collector registration");
            c
        };

        let kv_puts = counter("gossipkv_kv_puts_total", "Client put operations");
        let kv_gets = counter("gossipkv_kv_gets_total", "Client get operations");
        let kv_deletes = counter("gossipkv_kv_deletes_total", "Client delete operations");
        let reconciles = counter("gossipkv_reconciles_total", "Remote versions reconciled");
        let conflicts_merged = counter(
            "gossipkv_conflicts_merged_total",
            "Concurrent versions resolved by merge",
        );
        let hints_stored = counter(
            "gossipkv_hints_stored_total",
            "Writes buffered for down replicas",
        );
        let hints_delivered = counter(
            "gossipkv_hints_delivered_total",
            "Buffered writes replayed after recovery",
        );
        let pings_sent = counter("gossipkv_pings_sent_total", "Outbound liveness probes");
        let ping_failures = counter(
            "gossipkv_ping_failures_total",
            "Outbound liveness probes that failed",
        );
        let elections_started = counter(
            "gossipkv_elections_started_total",
            "Bully elections initiated",
        );
        let coordinator_announcements = counter(
            "gossipkv_coordinator_announcements_total",
            "Coordinatorship claims broadcast",
        );

        let kv_latency_secs = HistogramVec::new(
            HistogramOpts::new("gossipkv_kv_latency_seconds", "Latency of KV operations")
                .buckets(OP_BUCKETS.to_vec()),
            &["op_type"],
        )
        .expect("histogram opts");
        registry
            .register(Box::new(kv_latency_secs.clone()))
            .expect("collector registration");

        Self {
            registry,
            kv_puts,
            kv_gets,
            kv_deletes,
            reconciles,
            conflicts_merged,
            kv_latency_secs,
            hints_stored,
            hints_delivered,
            pings_sent,
            ping_failures,
            elections_started,
            coordinator_announcements,
        }
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn render_exposition() -> String {
    let families = metrics().registry.gather();
    let mut out = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut out) {
        tracing::error!("metrics encoding failed: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Time one KV operation; the elapsed time is recorded when the returned
/// guard drops.
pub fn kv_timer(op: &str) -> prometheus::HistogramTimer {
    metrics()
        .kv_latency_secs
        .with_label_values(&[op])
        .start_timer()
}

// ---------------------------------------------------------------------------
// Scrape endpoint
// ---------------------------------------------------------------------------

async fn handle_scrape(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let response = match req.uri().path() {
        "/metrics" => Response::builder()
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(render_exposition()))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new())),
    };
    Ok(response.expect("static response parts"))
}

/// Answer `GET /metrics` on `addr` until the enclosing task is dropped.
pub async fn serve_scrape_endpoint(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Prometheus scrape endpoint on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let conn = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(handle_scrape));
            if let Err(e) = conn.await {
                tracing::debug!("scrape connection from {} ended early: {}", peer, e);
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = metrics();
        let start = m.hints_stored.get();
        m.hints_stored.inc();
        m.hints_stored.inc();
        m.hints_stored.inc();
        assert_eq!(m.hints_stored.get() - start, 3);
    }

    #[test]
    fn test_exposition_lists_registered_families() {
        metrics().kv_puts.inc();
        metrics().pings_sent.inc();
        metrics().elections_started.inc();

        let text = render_exposition();
        for family in [
            "gossipkv_kv_puts_total",
            "gossipkv_pings_sent_total",
            "gossipkv_elections_started_total",
        ] {
            assert!(text.contains(family), "missing family {}", family);
        }
        assert!(text.contains("# TYPE gossipkv_kv_puts_total counter"));
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let histogram = metrics().kv_latency_secs.with_label_values(&["probe"]);
        let before = histogram.get_sample_count();
        drop(kv_timer("probe"));
        assert_eq!(histogram.get_sample_count() - before, 1);
    }
}
