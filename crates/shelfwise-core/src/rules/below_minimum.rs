//! R9 — below-minimum subcategory coverage.

use super::{Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Require a minimum number of distinct styles per (store, subcategory);
/// stores below it are brought up to max(minimum, 80% of the cluster
/// benchmark). These recommendations carry no concrete SPU, so the
/// consolidator routes them through the group allocator.
pub fn evaluate_below_minimum(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R9".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.below_minimum;

    let mut out = Vec::new();
    for cluster in ctx.clusters() {
        for subcat in ctx.subcats_in_cluster(cluster.cluster_id) {
            let Some(benchmark) = ctx.subcat_benchmark(cluster.cluster_id, subcat) else {
                continue;
            };
            let target_styles = (rcfg.min_styles_per_subcategory as f64)
                .max((rcfg.benchmark_fraction * benchmark).ceil());
            let qty_per_style = ctx
                .subcat_qty_per_style(cluster.cluster_id, subcat)
                .unwrap_or(1.0)
                .round()
                .max(1.0);

            for store_id in &cluster.store_ids {
                let pos = ctx.subcat_position(store_id, subcat);
                let current_styles = pos.map_or(0, |p| p.distinct_spus);
                if current_styles >= rcfg.min_styles_per_subcategory {
                    continue;
                }
                let missing_styles = (target_styles as usize).saturating_sub(current_styles);
                if missing_styles == 0 {
                    continue;
                }

                let delta = missing_styles as i64 * qty_per_style as i64;
                let current_qty = pos.map_or(0, |p| p.stock_qty.round() as i64);
                let unit_price = ctx.sales_per_unit(store_id);
                let category = ctx
                    .spus_in_cluster(cluster.cluster_id)
                    .iter()
                    .filter_map(|spu_id| ctx.spu(spu_id))
                    .find(|spu| spu.subcategory == subcat)
                    .map(|spu| spu.category.clone())
                    .unwrap_or_default();

                // Base confidence grows with how far below minimum the
                // store sits.
                let shortfall =
                    missing_styles as f64 / target_styles.max(1.0);
                let confidence = (0.6 + 0.3 * shortfall).clamp(0.0, 0.9);

                out.push(Recommendation {
                    rule_id: RuleId::BelowMinimum,
                    rule_ids: vec![RuleId::BelowMinimum],
                    store_id: store_id.clone(),
                    cluster_id: cluster.cluster_id,
                    target: RecommendationTarget::Subcategory(subcat.to_string()),
                    category,
                    subcategory: subcat.to_string(),
                    tags: Default::default(),
                    current_qty,
                    target_qty: current_qty + delta,
                    delta_qty: delta,
                    investment_delta: delta as f64 * unit_price,
                    expected_benefit: delta as f64 * unit_price,
                    confidence,
                    rationale: format!(
                        "{current_styles} of {} required styles in {subcat} (cluster benchmark {benchmark:.1})",
                        rcfg.min_styles_per_subcategory
                    ),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::context::testkit::Fixture;
    use super::*;

    fn coverage_fixture() -> Fixture {
        let mut fx = Fixture::single_cluster(&["S1", "S2", "S3"]);
        fx.spu("P1", "Tops", 100.0)
            .spu("P2", "Tops", 100.0)
            .spu("P3", "Tops", 100.0);
        // S1 and S2 carry three styles each; S3 carries one.
        for store in ["S1", "S2"] {
            fx.fact(store, "P1", 6.0, 600.0, 4.0)
                .fact(store, "P2", 6.0, 600.0, 4.0)
                .fact(store, "P3", 6.0, 600.0, 4.0);
        }
        fx.fact("S3", "P1", 6.0, 600.0, 4.0);
        fx
    }

    #[test]
    fn test_store_below_minimum_flagged() {
        let fx = coverage_fixture();
        let recs = evaluate_below_minimum(&fx.context(), &PipelineConfig::default()).unwrap();
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.store_id, "S3");
        assert!(matches!(
            rec.target,
            RecommendationTarget::Subcategory(ref s) if s == "Tops"
        ));
        // Benchmark (3+3+1)/3 = 2.33; target = max(2, ceil(0.8*2.33)) = 2,
        // one style short at 6 units per style.
        assert_eq!(rec.delta_qty, 6);
        assert_eq!(rec.current_qty, 4);
        assert_eq!(rec.target_qty, 10);
    }

    #[test]
    fn test_store_at_minimum_not_flagged() {
        let mut fx = Fixture::single_cluster(&["S1", "S2"]);
        fx.spu("P1", "Tops", 100.0).spu("P2", "Tops", 100.0);
        for store in ["S1", "S2"] {
            fx.fact(store, "P1", 5.0, 500.0, 5.0)
                .fact(store, "P2", 5.0, 500.0, 5.0);
        }
        let recs = evaluate_below_minimum(&fx.context(), &PipelineConfig::default()).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_zero_coverage_store_flagged_from_nothing() {
        let mut fx = Fixture::single_cluster(&["S1", "S2"]);
        fx.spu("P1", "Tops", 100.0)
            .spu("P2", "Tops", 100.0)
            .spu("P8", "Bottoms", 80.0)
            .spu("P9", "Bottoms", 80.0);
        fx.fact("S1", "P1", 5.0, 500.0, 5.0)
            .fact("S1", "P2", 5.0, 500.0, 5.0);
        // S2 only sells bottoms.
        fx.fact("S2", "P8", 5.0, 400.0, 5.0)
            .fact("S2", "P9", 5.0, 400.0, 5.0);
        let recs = evaluate_below_minimum(&fx.context(), &PipelineConfig::default()).unwrap();
        // S2 is missing Tops entirely; S1 is missing Bottoms entirely.
        assert_eq!(recs.len(), 2);
        let tops = recs
            .iter()
            .find(|r| r.subcategory == "Tops")
            .expect("missing Tops row");
        assert_eq!(tops.store_id, "S2");
        assert_eq!(tops.current_qty, 0);
        assert!(tops.delta_qty >= 2, "two styles worth of units");
    }
}
