use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// Room number. `floor * 100 + position` under the default layout.
pub type UnitId = u32;

pub type AllocationId = Ulid;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Where a unit stands. The owning allocation travels with `Allocated`,
/// so a unit can never carry an allocation id without being allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    Available,
    Occupied,
    Allocated(AllocationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub floor: u32,
    /// Offset along the corridor. Position 1 sits next to the lift.
    pub position: u32,
    pub status: UnitStatus,
}

impl Unit {
    pub fn new(id: UnitId, floor: u32, position: u32) -> Self {
        Self {
            id,
            floor,
            position,
            status: UnitStatus::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == UnitStatus::Available
    }

    pub fn allocation_id(&self) -> Option<AllocationId> {
        match self.status {
            UnitStatus::Allocated(id) => Some(id),
            _ => None,
        }
    }
}

/// Search strategy for `Engine::allocate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Lowest travel cost, deterministic tie-break.
    Optimal,
    /// Uniformly random units.
    Random,
}

/// How an allocation's units were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Optimal,
    Random,
    /// Caller named the units.
    Explicit,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::Optimal => "optimal",
            Source::Random => "random",
            Source::Explicit => "explicit",
        }
    }
}

impl From<Mode> for Source {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Optimal => Source::Optimal,
            Mode::Random => Source::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Active,
    Cancelled,
}

/// One granted block of units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub unit_ids: Vec<UnitId>,
    pub cost: u32,
    /// Distinct floors spanned, ascending.
    pub floors: Vec<u32>,
    pub source: Source,
    pub state: AllocationState,
    pub created_at: Ms,
}

impl Allocation {
    pub fn new(id: AllocationId, units: &[Unit], cost: u32, source: Source, created_at: Ms) -> Self {
        let mut floors: Vec<u32> = units.iter().map(|u| u.floor).collect();
        floors.sort_unstable();
        floors.dedup();
        Self {
            id,
            unit_ids: units.iter().map(|u| u.id).collect(),
            cost,
            floors,
            source,
            state: AllocationState::Active,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AllocationState::Active
    }

    /// "Floor 3" or "Floors 2, 3".
    pub fn floor_label(&self) -> String {
        match self.floors.as_slice() {
            [single] => format!("Floor {single}"),
            many => {
                let joined: Vec<String> = many.iter().map(|f| f.to_string()).collect();
                format!("Floors {}", joined.join(", "))
            }
        }
    }
}

/// Serialized view of an allocation with its floor label spelled out.
#[derive(Debug, Serialize)]
pub struct AllocationSummary<'a> {
    #[serde(flatten)]
    pub allocation: &'a Allocation,
    pub floor_label: String,
}

impl<'a> From<&'a Allocation> for AllocationSummary<'a> {
    fn from(allocation: &'a Allocation) -> Self {
        Self {
            allocation,
            floor_label: allocation.floor_label(),
        }
    }
}

/// Shape of the building. Every floor below the top has
/// `positions_per_floor` units; the top floor has `top_floor_positions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub floors: u32,
    pub positions_per_floor: u32,
    pub top_floor_positions: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            floors: 10,
            positions_per_floor: 10,
            top_floor_positions: 7,
        }
    }
}

impl Layout {
    pub fn unit_id(floor: u32, position: u32) -> UnitId {
        floor * 100 + position
    }

    pub fn total_units(&self) -> usize {
        if self.floors == 0 {
            return 0;
        }
        ((self.floors - 1) * self.positions_per_floor + self.top_floor_positions) as usize
    }

    /// All units, floor by floor, all Available.
    pub fn units(&self) -> Vec<Unit> {
        let mut units = Vec::with_capacity(self.total_units());
        for floor in 1..=self.floors {
            let positions = if floor == self.floors {
                self.top_floor_positions
            } else {
                self.positions_per_floor
            };
            for position in 1..=positions {
                units.push(Unit::new(Self::unit_id(floor, position), floor, position));
            }
        }
        units
    }
}

/// Counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStats {
    pub available: usize,
    pub occupied: usize,
    pub allocated: usize,
    pub total: usize,
}

impl InventoryStats {
    pub fn tally(units: &[Unit]) -> Self {
        let mut stats = Self {
            total: units.len(),
            ..Self::default()
        };
        for unit in units {
            match unit.status {
                UnitStatus::Available => stats.available += 1,
                UnitStatus::Occupied => stats.occupied += 1,
                UnitStatus::Allocated(_) => stats.allocated += 1,
            }
        }
        stats
    }
}

/// State changes, flat with no nesting. This is the WAL record format and the
/// unit of atomicity for the inventory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitAdded {
        id: UnitId,
        floor: u32,
        position: u32,
    },
    /// Every unit of the allocation moves Available → Allocated.
    BlockAllocated { allocation: Allocation },
    /// `released` move Occupied → Available, then `occupied` move to Occupied.
    OccupancyApplied {
        released: Vec<UnitId>,
        occupied: Vec<UnitId>,
    },
    /// Every unit back to Available, every active allocation cancelled.
    InventoryReset { at: Ms },
}

impl Event {
    /// Units this event writes, sorted and deduplicated. `None` means all of them.
    pub fn touched_units(&self) -> Option<Vec<UnitId>> {
        let mut ids = match self {
            Event::UnitAdded { id, .. } => vec![*id],
            Event::BlockAllocated { allocation } => allocation.unit_ids.clone(),
            Event::OccupancyApplied { released, occupied } => {
                released.iter().chain(occupied.iter()).copied().collect()
            }
            Event::InventoryReset { .. } => return None,
        };
        ids.sort_unstable();
        ids.dedup();
        Some(ids)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::UnitAdded { .. } => "unit_added",
            Event::BlockAllocated { .. } => "block_allocated",
            Event::OccupancyApplied { .. } => "occupancy_applied",
            Event::InventoryReset { .. } => "inventory_reset",
        }
    }
}
