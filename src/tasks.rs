use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::store::{AllocationStore, InventoryStore, Ledger};

/// How often the compactor checks the append counter.
const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Background task that reshuffles occupancy every `period`.
pub async fn run_occupancy_simulator<S>(engine: Arc<Engine<S>>, period: Duration)
where
    S: InventoryStore + AllocationStore,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.apply_occupancy().await {
            Ok(report) => debug!(
                "simulated occupancy: released {}, occupied {}",
                report.released,
                report.occupied.len()
            ),
            // An allocation grabbed a unit mid-pass; the next tick re-reads.
            Err(EngineError::Conflict(unit)) => debug!("occupancy pass skipped, unit {unit} changed"),
            Err(e) => warn!("occupancy pass failed: {e}"),
        }
    }
}

/// Background task that compacts the log once it has grown by `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine<Ledger>>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_PERIOD);
    loop {
        interval.tick().await;
        compact_if_due(engine.store(), threshold).await;
    }
}

/// One compactor step. Returns whether a compaction ran.
async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = ledger.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
