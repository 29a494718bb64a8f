use rand::Rng;
use rand::seq::SliceRandom;

use crate::model::Unit;

use super::cost::group_cost;
use super::optimizer::Selection;

/// `k` units drawn uniformly at random (Fisher–Yates), with the cost they
/// happen to have. `None` if fewer than `k` are available.
pub fn select_random<R: Rng + ?Sized>(available: &[Unit], k: usize, rng: &mut R) -> Option<Selection> {
    if k == 0 || available.len() < k {
        return None;
    }
    let mut shuffled = available.to_vec();
    shuffled.shuffle(rng);
    shuffled.truncate(k);
    let cost = group_cost(&shuffled);
    Some(Selection { units: shuffled, cost })
}
