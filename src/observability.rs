use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: allocation attempts. Labels: source, status.
pub const ALLOCATIONS_TOTAL: &str = "roomblock_allocations_total";

/// Histogram: optimizer search time in seconds. Labels: phase.
pub const SEARCH_DURATION_SECONDS: &str = "roomblock_search_duration_seconds";

/// Counter: commits rejected because a unit changed after the snapshot. Labels: event.
pub const COMMIT_CONFLICTS_TOTAL: &str = "roomblock_commit_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: Available units at the last snapshot.
pub const UNITS_AVAILABLE: &str = "roomblock_units_available";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomblock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomblock_wal_flush_batch_size";

/// Install the fmt subscriber. `RUST_LOG` overrides the default `roomblock=info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomblock=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
