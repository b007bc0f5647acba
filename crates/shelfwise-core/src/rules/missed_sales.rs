//! R11 — missed sales: positions selling far under the cluster mean.

use super::{Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// For positions whose sell-through sits under the minimum, estimate missed
/// sales against the cluster mean and translate them into units via the
/// store's realized sales-per-unit.
pub fn evaluate_missed_sales(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R11".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.missed_sales;

    let mut out = Vec::new();
    for cluster in ctx.clusters() {
        for spu_id in ctx.spus_in_cluster(cluster.cluster_id) {
            let Some(stats) = ctx.cluster_spu_stats(cluster.cluster_id, spu_id) else {
                continue;
            };
            for store_id in &cluster.store_ids {
                let Some(pos) = ctx.position(store_id, spu_id) else {
                    continue;
                };
                if pos.sell_through() >= rcfg.min_sell_through {
                    continue;
                }
                let missed = (stats.mean_amt - pos.sales_amt).max(0.0);
                if missed <= f64::EPSILON {
                    continue;
                }
                let per_unit = ctx.sales_per_unit(store_id);
                if per_unit <= f64::EPSILON {
                    continue;
                }
                let qty = (missed / per_unit).round() as i64;
                if qty < 1 {
                    continue;
                }

                let (category, subcategory, tags, price) = match ctx.spu(spu_id) {
                    Some(spu) => (
                        spu.category.clone(),
                        spu.subcategory.clone(),
                        spu.tags,
                        spu.price,
                    ),
                    None => (String::new(), String::new(), Default::default(), per_unit),
                };
                let current_qty = pos.stock_qty.round() as i64;
                // Larger relative gaps read as stronger signals.
                let confidence =
                    (0.5 + 0.4 * (missed / stats.mean_amt.max(1.0))).clamp(0.5, 0.9);
                out.push(Recommendation {
                    rule_id: RuleId::MissedSales,
                    rule_ids: vec![RuleId::MissedSales],
                    store_id: store_id.clone(),
                    cluster_id: cluster.cluster_id,
                    target: RecommendationTarget::Spu(spu_id.to_string()),
                    category,
                    subcategory,
                    tags,
                    current_qty,
                    target_qty: current_qty + qty,
                    delta_qty: qty,
                    investment_delta: qty as f64 * price,
                    expected_benefit: missed,
                    confidence,
                    rationale: format!(
                        "sell-through {:.0}% under {:.0}%; cluster mean sales {:.0} vs store {:.0}",
                        pos.sell_through() * 100.0,
                        rcfg.min_sell_through * 100.0,
                        stats.mean_amt,
                        pos.sales_amt
                    ),
                });
            }
        }
    }
    Ok(out)
}
