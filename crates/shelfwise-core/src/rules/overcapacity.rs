//! R10 — smart overcapacity: strategic increases for proven top performers.

use super::{Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Among cluster top performers with above-average allocation and spare
/// capacity, recommend a strategic increase in the store's strongest
/// subcategory. The strict/standard/lenient profile picks the three
/// qualifying thresholds.
pub fn evaluate_overcapacity(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R10".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.overcapacity;
    let (velocity_pct, allocation_multiple, max_util) = rcfg.profile.thresholds();

    let mut out = Vec::new();
    for cluster in ctx.clusters() {
        let Some(velocity_cut) =
            ctx.cluster_velocity_percentile(cluster.cluster_id, velocity_pct as usize)
        else {
            continue;
        };
        let mean_stock = cluster
            .store_ids
            .iter()
            .map(|s| ctx.total_stock(s))
            .sum::<f64>()
            / cluster.store_ids.len().max(1) as f64;
        if mean_stock <= f64::EPSILON {
            continue;
        }

        for store_id in &cluster.store_ids {
            let velocity = ctx.velocity(store_id);
            let stock = ctx.total_stock(store_id);
            let util = ctx.capacity_utilization(store_id);
            if velocity < velocity_cut
                || stock < allocation_multiple * mean_stock
                || util >= max_util
            {
                continue;
            }

            // Grow where the store already wins: its top subcategory by
            // sales amount.
            let best = ctx
                .subcats_in_cluster(cluster.cluster_id)
                .into_iter()
                .filter_map(|sc| {
                    ctx.subcat_position(store_id, sc)
                        .map(|p| (sc.to_string(), p.sales_amt, p.stock_qty))
                })
                .max_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.cmp(&a.0))
                });
            let Some((subcat, _, subcat_stock)) = best else {
                continue;
            };

            let delta = (rcfg.increase_fraction * subcat_stock).round().max(1.0) as i64;
            let current_qty = subcat_stock.round() as i64;
            let unit_price = ctx.sales_per_unit(store_id);
            out.push(Recommendation {
                rule_id: RuleId::SmartOvercapacity,
                rule_ids: vec![RuleId::SmartOvercapacity],
                store_id: store_id.clone(),
                cluster_id: cluster.cluster_id,
                target: RecommendationTarget::Subcategory(subcat.clone()),
                category: String::new(),
                subcategory: subcat,
                tags: Default::default(),
                current_qty,
                target_qty: current_qty + delta,
                delta_qty: delta,
                investment_delta: delta as f64 * unit_price,
                expected_benefit: delta as f64 * unit_price,
                confidence: 0.65,
                rationale: format!(
                    "top performer under the {} profile: velocity {velocity:.0} >= p{velocity_pct:.0} cut {velocity_cut:.0}, \
                     allocation {stock:.0} >= {allocation_multiple:.1}x cluster mean {mean_stock:.0}, utilization {util:.2} < {max_util:.2}",
                    rcfg.profile.as_str()
                ),
            });
        }
    }
    Ok(out)
}
