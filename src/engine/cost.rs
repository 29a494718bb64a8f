use crate::model::Unit;

/// Walking cost between two units. The lift sits at position 1 on every
/// floor; changing floors costs 2 per floor on top of walking to and from it.
pub fn pairwise_cost(a: &Unit, b: &Unit) -> u32 {
    if a.floor == b.floor {
        return a.position.abs_diff(b.position);
    }
    a.position.saturating_sub(1) + 2 * a.floor.abs_diff(b.floor) + b.position.saturating_sub(1)
}

/// Cost of a group: its two most distant members.
pub fn group_cost(units: &[Unit]) -> u32 {
    let mut worst = 0;
    for (i, a) in units.iter().enumerate() {
        for b in &units[i + 1..] {
            worst = worst.max(pairwise_cost(a, b));
        }
    }
    worst
}
