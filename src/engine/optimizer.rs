//! Lowest-cost block search.
//!
//! Two phases in strict priority order:
//!
//! 1. **Same floor.** Every floor with at least `k` free units is scanned as
//!    sliding windows of `k` position-adjacent units. Any hit ends the search:
//!    a block on one floor always wins over a block spread across floors.
//! 2. **Cross floor.** Depth-first search over `k`-subsets of each floor's
//!    `k` lift-nearest units, pruning any branch whose running cost already
//!    exceeds the best complete block.
//!
//! Equal costs are broken by the ascending-sorted id sequence, smallest first,
//! so the answer depends only on the set of available units.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::debug;

use crate::model::{Unit, UnitId};

use super::cost::{group_cost, pairwise_cost};

/// A chosen block and what it costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub units: Vec<Unit>,
    pub cost: u32,
}

/// Best block seen so far, with its sorted ids cached for tie-breaks.
#[derive(Debug)]
struct Best {
    cost: u32,
    sorted_ids: Vec<UnitId>,
    units: Vec<Unit>,
}

impl Best {
    fn offer(slot: &mut Option<Best>, cost: u32, units: &[Unit]) {
        let mut sorted_ids: Vec<UnitId> = units.iter().map(|u| u.id).collect();
        sorted_ids.sort_unstable();
        let wins = match slot {
            None => true,
            Some(best) => (cost, &sorted_ids) < (best.cost, &best.sorted_ids),
        };
        if wins {
            *slot = Some(Best {
                cost,
                sorted_ids,
                units: units.to_vec(),
            });
        }
    }

    fn into_selection(self) -> Selection {
        Selection {
            units: self.units,
            cost: self.cost,
        }
    }
}

/// Available units per floor, each floor ordered by position (then id).
fn by_floor(available: &[Unit]) -> BTreeMap<u32, Vec<Unit>> {
    let mut floors: BTreeMap<u32, Vec<Unit>> = BTreeMap::new();
    for unit in available {
        floors.entry(unit.floor).or_default().push(*unit);
    }
    for units in floors.values_mut() {
        units.sort_by_key(|u| (u.position, u.id));
    }
    floors
}

/// Lowest-cost block of `k` units, or `None` if fewer than `k` are available.
/// The caller is responsible for capping `k`.
pub fn select_optimal(available: &[Unit], k: usize) -> Option<Selection> {
    if k == 0 || available.len() < k {
        return None;
    }
    let floors = by_floor(available);

    let started = Instant::now();
    if let Some(best) = best_same_floor(&floors, k) {
        metrics::histogram!(crate::observability::SEARCH_DURATION_SECONDS, "phase" => "same_floor")
            .record(started.elapsed().as_secs_f64());
        debug!("same-floor block for k={k}: cost {}", best.cost);
        return Some(best.into_selection());
    }

    let started = Instant::now();
    let best = best_cross_floor(&floors, k);
    metrics::histogram!(crate::observability::SEARCH_DURATION_SECONDS, "phase" => "cross_floor")
        .record(started.elapsed().as_secs_f64());
    if let Some(best) = &best {
        debug!("cross-floor block for k={k}: cost {}", best.cost);
    }
    best.map(Best::into_selection)
}

fn best_same_floor(floors: &BTreeMap<u32, Vec<Unit>>, k: usize) -> Option<Best> {
    let mut best = None;
    for units in floors.values().filter(|units| units.len() >= k) {
        for window in units.windows(k) {
            Best::offer(&mut best, group_cost(window), window);
        }
    }
    best
}

/// Accumulator for the cross-floor depth-first search.
struct CrossSearch<'a> {
    candidates: &'a [Unit],
    k: usize,
    chosen: Vec<Unit>,
    best: Option<Best>,
}

impl CrossSearch<'_> {
    fn descend(&mut self, start: usize, running: u32) {
        if self.chosen.len() == self.k {
            Best::offer(&mut self.best, running, &self.chosen);
            return;
        }
        let needed = self.k - self.chosen.len();
        for i in start..self.candidates.len() {
            if self.candidates.len() - i < needed {
                break;
            }
            let next = self.candidates[i];
            let cost = self
                .chosen
                .iter()
                .map(|c| pairwise_cost(c, &next))
                .fold(running, u32::max);
            if self.best.as_ref().is_some_and(|b| cost > b.cost) {
                continue;
            }
            self.chosen.push(next);
            self.descend(i + 1, cost);
            self.chosen.pop();
        }
    }
}

fn best_cross_floor(floors: &BTreeMap<u32, Vec<Unit>>, k: usize) -> Option<Best> {
    let candidates: Vec<Unit> = floors
        .values()
        .flat_map(|units| units.iter().take(k).copied())
        .collect();
    let mut search = CrossSearch {
        candidates: &candidates,
        k,
        chosen: Vec::with_capacity(k),
        best: None,
    };
    search.descend(0, 0);
    search.best
}
