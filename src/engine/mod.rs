//! The allocation engine: cost model, block search, and the coordinator
//! that turns a search result into a committed allocation.
//!
//! Searches run on a snapshot taken from the inventory store and never touch
//! shared state. The only synchronization point is the store's conditional
//! commit, which rejects the whole block if any chosen unit changed since the
//! snapshot. Retrying after [`EngineError::Conflict`] is always safe because
//! every attempt re-snapshots.

mod cost;
mod error;
mod mutations;
mod optimizer;
mod queries;
mod selector;

pub use cost::{group_cost, pairwise_cost};
pub use error::EngineError;
pub use mutations::OccupancyReport;
pub use optimizer::{select_optimal, Selection};
pub use selector::select_random;

use std::sync::{Mutex, PoisonError};

use tracing::warn;
use ulid::{Generator, Ulid};

use crate::model::{AllocationId, Event};
use crate::store::{AllocationStore, Assign, InventoryStore};

/// Allocation coordinator. Sole writer of unit status and allocation state,
/// always through `S`.
pub struct Engine<S> {
    store: S,
    /// Monotonic ids, so allocations made in the same millisecond still
    /// sort in creation order.
    ids: Mutex<Generator>,
}

impl<S> Engine<S>
where
    S: InventoryStore + AllocationStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            ids: Mutex::new(Generator::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn next_allocation_id(&self) -> AllocationId {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        // Overflow needs 2^80 ids in one millisecond.
        ids.generate().unwrap_or_else(|_| Ulid::new())
    }

    /// Conditional write through the store; a failed precondition becomes `Conflict`.
    async fn commit(&self, event: Event) -> Result<(), EngineError> {
        let label = event.label();
        match self.store.conditional_bulk_assign(event).await? {
            Assign::Applied => Ok(()),
            Assign::Conflict(unit) => {
                metrics::counter!(crate::observability::COMMIT_CONFLICTS_TOTAL, "event" => label)
                    .increment(1);
                warn!("{label} lost the race for unit {unit}");
                Err(EngineError::Conflict(unit))
            }
        }
    }
}
