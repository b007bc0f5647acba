//! Consolidation of the six rule streams into one action plan.
//!
//! One row survives per (store, SPU-or-subcategory) fingerprint: the highest
//! confidence x |benefit| wins, the union of triggering rules is recorded,
//! and conflicting signs are resolved by that same priority, never summed.
//! Consolidating already-consolidated output is a no-op.

use crate::config::SanityCaps;
use crate::report::RejectedRecommendation;
use crate::rules::Recommendation;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Consolidated plan plus the rows dropped by the per-store caps.
#[derive(Debug, Default)]
pub struct Consolidated {
    pub rows: Vec<Recommendation>,
    pub rejected: Vec<RejectedRecommendation>,
}

/// Deduplicate by fingerprint, then trim each store to the universal caps.
pub fn consolidate(recs: Vec<Recommendation>, caps: &SanityCaps) -> Consolidated {
    // Winner per fingerprint.
    let mut by_fingerprint: BTreeMap<String, Recommendation> = BTreeMap::new();
    for rec in recs {
        match by_fingerprint.entry(rec.fingerprint()) {
            Entry::Vacant(slot) => {
                slot.insert(rec);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let replace = rec.priority() > existing.priority()
                    || (rec.priority() == existing.priority()
                        && rec.rule_id < existing.rule_id);
                let (mut winner, loser) = if replace {
                    (rec, existing.clone())
                } else {
                    (existing.clone(), rec)
                };
                for rule in &loser.rule_ids {
                    if !winner.rule_ids.contains(rule) {
                        winner.rule_ids.push(*rule);
                    }
                }
                winner.rule_ids.sort();
                let corroborating: Vec<&str> = winner
                    .rule_ids
                    .iter()
                    .filter(|r| **r != winner.rule_id)
                    .map(|r| r.code())
                    .collect();
                if !corroborating.is_empty() {
                    let note = format!("corroborated by {}", corroborating.join(","));
                    if !winner.rationale.contains(&note) {
                        winner.rationale = format!("{}; {note}", winner.rationale);
                    }
                }
                *existing = winner;
            }
        }
    }
    debug!(rows = by_fingerprint.len(), "deduplicated by fingerprint");

    // Per-store caps across the merged set, highest priority first.
    let mut by_store: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    for (_, rec) in by_fingerprint {
        by_store.entry(rec.store_id.clone()).or_default().push(rec);
    }

    let mut out = Consolidated::default();
    for (_, mut recs) in by_store {
        recs.sort_by(|a, b| {
            b.priority()
                .partial_cmp(&a.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target.key().cmp(b.target.key()))
        });
        let mut changes = 0usize;
        let mut quantity = 0i64;
        let mut investment = 0.0f64;
        for rec in recs {
            let constraint = if changes + 1 > caps.max_total_spu_changes_per_store {
                Some("max_total_spu_changes_per_store")
            } else if quantity + rec.delta_qty.abs() > caps.max_total_quantity_changes_per_store
            {
                Some("max_total_quantity_changes_per_store")
            } else if investment + rec.investment_delta.max(0.0) > caps.max_investment_per_store
            {
                Some("max_investment_per_store")
            } else {
                None
            };
            match constraint {
                None => {
                    changes += 1;
                    quantity += rec.delta_qty.abs();
                    investment += rec.investment_delta.max(0.0);
                    out.rows.push(rec);
                }
                Some(name) => out.rejected.push(RejectedRecommendation {
                    rule_id: rec.rule_id.code().to_string(),
                    store_id: rec.store_id.clone(),
                    target: rec.target.key().to_string(),
                    constraint: name.to_string(),
                }),
            }
        }
    }

    out.rows.sort_by(|a, b| {
        a.rule_id
            .cmp(&b.rule_id)
            .then_with(|| a.store_id.cmp(&b.store_id))
            .then_with(|| a.target.key().cmp(b.target.key()))
    });
    info!(
        rows = out.rows.len(),
        rejected = out.rejected.len(),
        "consolidated recommendations"
    );
    out
}
