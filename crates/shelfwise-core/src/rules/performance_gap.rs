//! R12 — sales performance gap against the cluster benchmark.

use super::{z_confidence, Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

/// Flag carried positions selling strictly below the Z threshold, targeting
/// the cluster benchmark percentile. Only the top few opportunities per
/// store survive, each cleared on ROI and gap size.
pub fn evaluate_performance_gap(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R12".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.performance_gap;

    let mut candidates = Vec::new();
    for cluster in ctx.clusters() {
        for spu_id in ctx.spus_in_cluster(cluster.cluster_id) {
            let Some(stats) = ctx.cluster_spu_stats(cluster.cluster_id, spu_id) else {
                continue;
            };
            if stats.std_amt <= f64::EPSILON {
                continue;
            }
            let benchmark = ctx
                .cluster_spu_amt_percentile(
                    cluster.cluster_id,
                    spu_id,
                    rcfg.benchmark_percentile,
                )
                .unwrap_or(stats.mean_amt)
                .max(stats.mean_amt);

            for store_id in &cluster.store_ids {
                let Some(pos) = ctx.position(store_id, spu_id) else {
                    continue;
                };
                let z = (pos.sales_amt - stats.mean_amt) / stats.std_amt;
                if z >= rcfg.z_flag_threshold {
                    continue;
                }
                let gap_z = (benchmark - pos.sales_amt) / stats.std_amt;
                if gap_z < rcfg.min_opportunity_gap {
                    continue;
                }

                let per_unit = ctx.sales_per_unit(store_id);
                if per_unit <= f64::EPSILON {
                    continue;
                }
                let benefit = benchmark - pos.sales_amt;
                let qty = (benefit / per_unit).round() as i64;
                if qty < 1 {
                    continue;
                }
                let unit_price = ctx
                    .spu(spu_id)
                    .map(|s| s.price)
                    .unwrap_or(per_unit);
                let investment = qty as f64 * unit_price;
                if investment <= f64::EPSILON || benefit / investment < rcfg.min_roi {
                    continue;
                }

                let (category, subcategory, tags) = match ctx.spu(spu_id) {
                    Some(spu) => (spu.category.clone(), spu.subcategory.clone(), spu.tags),
                    None => (String::new(), String::new(), Default::default()),
                };
                let current_qty = pos.stock_qty.round() as i64;
                candidates.push(Recommendation {
                    rule_id: RuleId::PerformanceGap,
                    rule_ids: vec![RuleId::PerformanceGap],
                    store_id: store_id.clone(),
                    cluster_id: cluster.cluster_id,
                    target: RecommendationTarget::Spu(spu_id.to_string()),
                    category,
                    subcategory,
                    tags,
                    current_qty,
                    target_qty: current_qty + qty,
                    delta_qty: qty,
                    investment_delta: investment,
                    expected_benefit: benefit,
                    confidence: z_confidence(z),
                    rationale: format!(
                        "sales Z-score {z:.1}; p{} benchmark {benchmark:.0} vs store {:.0}",
                        rcfg.benchmark_percentile, pos.sales_amt
                    ),
                });
            }
        }
    }

    // Focus each store on its largest gaps, bounded by the per-store unit
    // budget.
    let mut by_store: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    for rec in candidates {
        by_store.entry(rec.store_id.clone()).or_default().push(rec);
    }
    let mut out = Vec::new();
    for (_, mut recs) in by_store {
        recs.sort_by(|a, b| {
            b.expected_benefit
                .partial_cmp(&a.expected_benefit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target.key().cmp(b.target.key()))
        });
        recs.truncate(rcfg.top_opportunities);
        let mut budget = rcfg.max_increase_per_store;
        for mut rec in recs {
            if budget <= 0 {
                break;
            }
            if rec.delta_qty > budget {
                let unit = rec.investment_delta / rec.delta_qty as f64;
                rec.delta_qty = budget;
                rec.target_qty = rec.current_qty + budget;
                rec.investment_delta = budget as f64 * unit;
            }
            budget -= rec.delta_qty;
            out.push(rec);
        }
    }
    Ok(out)
}
