//! Storage seams the allocation engine talks through.
//!
//! The engine never writes unit status or allocation records directly: every
//! change is an [`Event`] handed to [`InventoryStore::conditional_bulk_assign`],
//! which checks the event's preconditions and applies it all-or-nothing.

mod ledger;

pub use ledger::Ledger;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Log append/flush failed or the writer is gone.
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    Applied,
    /// This unit's status no longer matched the precondition (or the unit
    /// does not exist). Nothing was written.
    Conflict(UnitId),
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Every unit, read as one consistent view.
    async fn list_units(&self) -> Result<Vec<Unit>, StoreError>;

    async fn list_available(&self) -> Result<Vec<Unit>, StoreError> {
        let mut units = self.list_units().await?;
        units.retain(Unit::is_available);
        Ok(units)
    }

    /// Apply `event` iff its preconditions hold for every unit it touches:
    ///
    /// - `UnitAdded`: the id is not taken.
    /// - `BlockAllocated`: every unit is Available. Creates the allocation record.
    /// - `OccupancyApplied`: released units are Occupied, newly occupied units
    ///   are Available (or being released).
    /// - `InventoryReset`: none. Cancels every active allocation.
    async fn conditional_bulk_assign(&self, event: Event) -> Result<Assign, StoreError>;
}

#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Active allocations, newest first.
    async fn list_active(&self, limit: usize) -> Result<Vec<Allocation>, StoreError>;

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError>;
}
