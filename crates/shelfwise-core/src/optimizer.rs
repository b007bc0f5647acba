//! Optional global sell-through optimizer.
//!
//! Greedy marginal-gain solver for the capacity/inventory-constrained
//! allocation program: units go to the highest predicted sell-through gain
//! first, ties broken by (SPU, store) order so reruns are byte-identical.
//! Disabled by default; when off, the largest-remainder allocation is the
//! authoritative result.

use std::collections::BTreeMap;
use tracing::debug;

/// One candidate (SPU, store) assignment with its per-unit score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub spu_id: String,
    pub store_id: String,
    /// Predicted sell-through gain per allocated unit.
    pub score: f64,
    /// Units requested for this pair.
    pub requested: i64,
}

/// Solve `maximize sum(score * alloc)` subject to per-store capacity and
/// per-SPU inventory, integer allocations.
pub fn optimize(
    candidates: &[Candidate],
    capacities: &BTreeMap<String, i64>,
    inventories: &BTreeMap<String, i64>,
) -> BTreeMap<(String, String), i64> {
    let mut capacity_left: BTreeMap<&str, i64> = capacities
        .iter()
        .map(|(k, v)| (k.as_str(), (*v).max(0)))
        .collect();
    let mut inventory_left: BTreeMap<&str, i64> = inventories
        .iter()
        .map(|(k, v)| (k.as_str(), (*v).max(0)))
        .collect();

    let mut order: Vec<&Candidate> = candidates.iter().filter(|c| c.requested > 0).collect();
    order.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.spu_id.cmp(&b.spu_id))
            .then_with(|| a.store_id.cmp(&b.store_id))
    });

    let mut out = BTreeMap::new();
    for candidate in order {
        let Some(cap) = capacity_left.get_mut(candidate.store_id.as_str()) else {
            continue;
        };
        let Some(inv) = inventory_left.get_mut(candidate.spu_id.as_str()) else {
            continue;
        };
        let units = candidate.requested.min(*cap).min(*inv);
        if units <= 0 {
            continue;
        }
        *cap -= units;
        *inv -= units;
        out.insert(
            (candidate.spu_id.clone(), candidate.store_id.clone()),
            units,
        );
    }
    debug!(assignments = out.len(), "global optimizer finished");
    out
}
