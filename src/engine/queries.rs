use crate::limits::*;
use crate::model::*;
use crate::store::{AllocationStore, InventoryStore};

use super::{Engine, EngineError};

impl<S> Engine<S>
where
    S: InventoryStore + AllocationStore,
{
    /// Every unit, top floor first, then by position along the corridor.
    pub async fn list_units(&self) -> Result<Vec<Unit>, EngineError> {
        let mut units = self.store.list_units().await?;
        units.sort_by(|a, b| b.floor.cmp(&a.floor).then(a.position.cmp(&b.position)));
        Ok(units)
    }

    pub async fn list_available(&self) -> Result<Vec<Unit>, EngineError> {
        Ok(self.store.list_available().await?)
    }

    pub async fn stats(&self) -> Result<InventoryStats, EngineError> {
        let stats = InventoryStats::tally(&self.store.list_units().await?);
        metrics::gauge!(crate::observability::UNITS_AVAILABLE).set(stats.available as f64);
        Ok(stats)
    }

    /// Active allocations, newest first. At most `MAX_LISTED_ALLOCATIONS`.
    pub async fn list_allocations(&self, limit: usize) -> Result<Vec<Allocation>, EngineError> {
        Ok(self
            .store
            .list_active(limit.min(MAX_LISTED_ALLOCATIONS))
            .await?)
    }

    /// Looks up active and cancelled allocations alike.
    pub async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, EngineError> {
        Ok(self.store.get_allocation(id).await?)
    }
}
