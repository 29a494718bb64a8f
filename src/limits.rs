/// Largest block a single request may ask for.
pub const MAX_BLOCK: usize = 5;

/// Cap on `list_allocations`.
pub const MAX_LISTED_ALLOCATIONS: usize = 50;

/// Positions per floor are limited so `floor * 100 + position` stays unique.
pub const MAX_POSITIONS_PER_FLOOR: u32 = 99;

pub const MAX_FLOORS: u32 = 1000;

/// Random occupancy marks between 25% and 45% of available units.
pub const OCCUPANCY_MIN_FRACTION: f64 = 0.25;
pub const OCCUPANCY_FRACTION_SPREAD: f64 = 0.20;
