//! R8 — imbalanced allocation: quantity outliers against cluster peers.

use super::{z_confidence, Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

/// Flag stores whose quantity for an SPU sits strictly beyond the Z-score
/// threshold against the cluster mean. Over-allocated stores come back to
/// the mean; under-allocated stores go to mean + one standard deviation.
pub fn evaluate_imbalance(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R8".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.imbalance;

    let mut candidates = Vec::new();
    for cluster in ctx.clusters() {
        for spu_id in ctx.spus_in_cluster(cluster.cluster_id) {
            let Some(stats) = ctx.cluster_spu_stats(cluster.cluster_id, spu_id) else {
                continue;
            };
            if stats.std_qty <= f64::EPSILON {
                continue;
            }
            for store_id in &cluster.store_ids {
                let Some(pos) = ctx.position(store_id, spu_id) else {
                    continue;
                };
                let z = (pos.sales_qty - stats.mean_qty) / stats.std_qty;
                if z.abs() <= rcfg.z_threshold {
                    continue;
                }

                let target_qty = if z > 0.0 {
                    stats.mean_qty
                } else {
                    stats.mean_qty + stats.std_qty
                };
                let target_qty = target_qty.round().max(0.0) as i64;
                let current_qty = pos.sales_qty.round() as i64;
                let delta = target_qty - current_qty;
                let unit_price = ctx
                    .spu(spu_id)
                    .map(|s| s.price)
                    .unwrap_or_else(|| ctx.sales_per_unit(store_id));
                if (delta.abs() as f64) < rcfg.min_adjustment_quantity
                    || (delta.abs() as f64 * unit_price) < rcfg.min_adjustment_value
                {
                    continue;
                }

                let (category, subcategory, tags) = match ctx.spu(spu_id) {
                    Some(spu) => (spu.category.clone(), spu.subcategory.clone(), spu.tags),
                    None => (String::new(), String::new(), Default::default()),
                };
                candidates.push(Recommendation {
                    rule_id: RuleId::ImbalancedAllocation,
                    rule_ids: vec![RuleId::ImbalancedAllocation],
                    store_id: store_id.clone(),
                    cluster_id: cluster.cluster_id,
                    target: RecommendationTarget::Spu(spu_id.to_string()),
                    category,
                    subcategory,
                    tags,
                    current_qty,
                    target_qty,
                    delta_qty: delta,
                    investment_delta: delta as f64 * unit_price,
                    expected_benefit: delta.abs() as f64 * unit_price,
                    confidence: z_confidence(z),
                    rationale: format!(
                        "quantity Z-score {z:.1} against cluster {} (mean {:.0}, std {:.0})",
                        cluster.cluster_id, stats.mean_qty, stats.std_qty
                    ),
                });
            }
        }
    }

    // Worst imbalances first, bounded per store.
    let mut by_store: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    for rec in candidates {
        by_store.entry(rec.store_id.clone()).or_default().push(rec);
    }
    let mut out = Vec::new();
    for (_, mut recs) in by_store {
        recs.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target.key().cmp(b.target.key()))
        });
        recs.truncate(rcfg.max_adjustments_per_store);
        out.extend(recs);
    }
    Ok(out)
}
