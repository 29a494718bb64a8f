use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::store::{AllocationStore, InventoryStore};

use super::cost::group_cost;
use super::optimizer::{select_optimal, Selection};
use super::selector::select_random;
use super::{Engine, EngineError};

/// Result of a random occupancy pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyReport {
    /// Units that were Occupied before the pass.
    pub released: usize,
    /// Units Occupied now, ascending.
    pub occupied: Vec<UnitId>,
}

fn validate_block_size(k: usize) -> Result<(), EngineError> {
    if k == 0 || k > MAX_BLOCK {
        return Err(EngineError::InvalidRequest(format!(
            "block size must be between 1 and {MAX_BLOCK}, got {k}"
        )));
    }
    Ok(())
}

fn record_outcome(source: Source, result: &Result<Allocation, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(
        crate::observability::ALLOCATIONS_TOTAL,
        "source" => source.label(),
        "status" => status
    )
    .increment(1);
}

/// Run the search for `mode` over a snapshot. Synchronous, so the thread
/// rng never lives inside an allocation future.
fn search(snapshot: &[Unit], k: usize, mode: Mode) -> Option<Selection> {
    match mode {
        Mode::Optimal => select_optimal(snapshot, k),
        Mode::Random => select_random(snapshot, k, &mut rand::thread_rng()),
    }
}

/// Free every Occupied unit, then occupy 25–45% of what is free.
/// Returns `(released, occupied)`, both ascending.
fn plan_occupancy<R: Rng + ?Sized>(units: &[Unit], rng: &mut R) -> (Vec<UnitId>, Vec<UnitId>) {
    let released: Vec<UnitId> = units
        .iter()
        .filter(|u| u.status == UnitStatus::Occupied)
        .map(|u| u.id)
        .collect();
    let mut pool: Vec<UnitId> = units
        .iter()
        .filter(|u| !matches!(u.status, UnitStatus::Allocated(_)))
        .map(|u| u.id)
        .collect();

    let fraction = OCCUPANCY_MIN_FRACTION + rng.r#gen::<f64>() * OCCUPANCY_FRACTION_SPREAD;
    let count = (pool.len() as f64 * fraction).floor() as usize;
    pool.shuffle(rng);
    pool.truncate(count);
    pool.sort_unstable();
    (released, pool)
}

impl<S> Engine<S>
where
    S: InventoryStore + AllocationStore,
{
    /// Grant a block of `k` units chosen by `mode`.
    pub async fn allocate(&self, k: usize, mode: Mode) -> Result<Allocation, EngineError> {
        let result = self.try_allocate(k, mode).await;
        record_outcome(mode.into(), &result);
        result
    }

    async fn try_allocate(&self, k: usize, mode: Mode) -> Result<Allocation, EngineError> {
        validate_block_size(k)?;
        let snapshot = self.store.list_available().await?;
        metrics::gauge!(crate::observability::UNITS_AVAILABLE).set(snapshot.len() as f64);
        let insufficient = EngineError::InsufficientInventory {
            requested: k,
            available: snapshot.len(),
        };
        if snapshot.len() < k {
            return Err(insufficient);
        }

        let selection = search(&snapshot, k, mode).ok_or(insufficient)?;
        self.commit_block(selection, mode.into()).await
    }

    /// Grant exactly `unit_ids`, skipping the search.
    pub async fn allocate_explicit(&self, unit_ids: &[UnitId]) -> Result<Allocation, EngineError> {
        let result = self.try_allocate_explicit(unit_ids).await;
        record_outcome(Source::Explicit, &result);
        result
    }

    async fn try_allocate_explicit(&self, unit_ids: &[UnitId]) -> Result<Allocation, EngineError> {
        validate_block_size(unit_ids.len())?;
        let mut seen = HashSet::with_capacity(unit_ids.len());
        if let Some(dup) = unit_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EngineError::InvalidRequest(format!("unit {dup} requested twice")));
        }

        let units: HashMap<UnitId, Unit> = self
            .store
            .list_units()
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let mut chosen = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            let unit = units
                .get(id)
                .ok_or_else(|| EngineError::InvalidRequest(format!("unknown unit {id}")))?;
            if !unit.is_available() {
                return Err(EngineError::Conflict(*id));
            }
            chosen.push(*unit);
        }

        let cost = group_cost(&chosen);
        self.commit_block(Selection { units: chosen, cost }, Source::Explicit).await
    }

    async fn commit_block(&self, selection: Selection, source: Source) -> Result<Allocation, EngineError> {
        let id = self.next_allocation_id();
        // created_at comes from the id, so both orderings agree.
        let allocation =
            Allocation::new(id, &selection.units, selection.cost, source, id.timestamp_ms() as Ms);
        self.commit(Event::BlockAllocated {
            allocation: allocation.clone(),
        })
        .await?;
        info!(
            "allocated {:?} ({}, cost {}, {}) as {}",
            allocation.unit_ids,
            source.label(),
            allocation.cost,
            allocation.floor_label(),
            allocation.id
        );
        Ok(allocation)
    }

    /// Every unit back to Available, every active allocation cancelled.
    pub async fn reset_all(&self) -> Result<(), EngineError> {
        self.commit(Event::InventoryReset { at: now_ms() }).await?;
        info!("inventory reset");
        Ok(())
    }

    pub async fn apply_occupancy(&self) -> Result<OccupancyReport, EngineError> {
        self.apply_occupancy_with(&mut StdRng::from_entropy()).await
    }

    /// `apply_occupancy` with a caller-supplied rng.
    pub async fn apply_occupancy_with<R: Rng + Send>(
        &self,
        rng: &mut R,
    ) -> Result<OccupancyReport, EngineError> {
        let units = self.store.list_units().await?;
        let (released, occupied) = plan_occupancy(&units, rng);
        let report = OccupancyReport {
            released: released.len(),
            occupied: occupied.clone(),
        };
        self.commit(Event::OccupancyApplied { released, occupied }).await?;
        info!(
            "occupancy applied: released {}, occupied {}",
            report.released,
            report.occupied.len()
        );
        Ok(report)
    }
}
