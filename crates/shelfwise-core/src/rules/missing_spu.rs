//! R7 — missing SPU: cluster-adopted products a member store does not stock.

use super::{Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

/// Flag stores missing an SPU that nearly all cluster peers stock with real
/// sales behind it. Recommended quantity is the cluster mean among stocking
/// peers, capped per store.
pub fn evaluate_missing_spu(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
) -> Result<Vec<Recommendation>> {
    if !ctx.has_sales() {
        return Err(PipelineError::RuleInput {
            rule: "R7".to_string(),
            reason: "no sales facts joined to clusters".to_string(),
        });
    }
    let rcfg = &cfg.rules.missing_spu;

    let mut candidates = Vec::new();
    for cluster in ctx.clusters() {
        if cluster.store_ids.len() < rcfg.min_cluster_size {
            continue;
        }
        for spu_id in ctx.spus_in_cluster(cluster.cluster_id) {
            let Some(stats) = ctx.cluster_spu_stats(cluster.cluster_id, spu_id) else {
                continue;
            };
            if stats.adoption() < rcfg.adoption_threshold
                || stats.total_amt < rcfg.min_sales_threshold
            {
                continue;
            }

            let missing: Vec<&String> = cluster
                .store_ids
                .iter()
                .filter(|store| {
                    ctx.position(store, spu_id)
                        .map_or(true, |p| p.sales_qty <= 0.0 && p.stock_qty <= 0.0)
                })
                .collect();
            if missing.is_empty() {
                continue;
            }
            let opportunity = missing.len() as f64 * stats.mean_amt_stocked;
            if opportunity < rcfg.min_total_opportunity {
                continue;
            }

            let qty = stats.mean_qty_stocked.round().max(1.0) as i64;
            for store_id in missing {
                let (category, subcategory, tags, price) = match ctx.spu(spu_id) {
                    Some(spu) => (
                        spu.category.clone(),
                        spu.subcategory.clone(),
                        spu.tags,
                        spu.price,
                    ),
                    None => (
                        String::new(),
                        String::new(),
                        Default::default(),
                        ctx.sales_per_unit(store_id),
                    ),
                };
                candidates.push(Recommendation {
                    rule_id: RuleId::MissingSpu,
                    rule_ids: vec![RuleId::MissingSpu],
                    store_id: store_id.clone(),
                    cluster_id: cluster.cluster_id,
                    target: RecommendationTarget::Spu(spu_id.to_string()),
                    category,
                    subcategory,
                    tags,
                    current_qty: 0,
                    target_qty: qty,
                    delta_qty: qty,
                    investment_delta: qty as f64 * price,
                    expected_benefit: stats.mean_amt_stocked,
                    confidence: stats.adoption().clamp(0.0, 1.0),
                    rationale: format!(
                        "{:.0}% of cluster {} peers stock this SPU (mean {} units, mean sales {:.0})",
                        stats.adoption() * 100.0,
                        cluster.cluster_id,
                        qty,
                        stats.mean_amt_stocked
                    ),
                });
            }
        }
    }

    // Keep only the best few gaps per store.
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
        recs.truncate(rcfg.max_missing_spus_per_store);
        out.extend(recs);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::context::testkit::Fixture;
    use super::*;

    /// Nine of ten stores stock P1 heavily; S10 does not.
    fn adopted_fixture() -> Fixture {
        let ids: Vec<String> = (1..=10).map(|i| format!("S{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut fx = Fixture::single_cluster(&refs);
        fx.spu("P1", "Tops", 100.0);
        for id in ids.iter().take(9) {
            fx.fact(id, "P1", 10.0, 3000.0, 5.0);
        }
        // S10 sells something else so it stays a live store.
        fx.spu("P2", "Tops", 100.0);
        fx.fact("S10", "P2", 10.0, 1000.0, 5.0);
        fx
    }

    #[test]
    fn test_missing_store_is_flagged() {
        let fx = adopted_fixture();
        let mut cfg = PipelineConfig::default();
        cfg.rules.missing_spu.adoption_threshold = 0.9;
        let recs = evaluate_missing_spu(&fx.context(), &cfg).unwrap();
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.store_id, "S10");
        assert_eq!(rec.target.key(), "P1");
        assert_eq!(rec.delta_qty, 10);
        assert!(rec.confidence >= 0.9);
    }

    #[test]
    fn test_adoption_threshold_suppresses() {
        let fx = adopted_fixture();
        // Default threshold is 0.98; 9/10 adoption is not enough.
        let cfg = PipelineConfig::default();
        let recs = evaluate_missing_spu(&fx.context(), &cfg).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_small_cluster_emits_nothing() {
        let mut fx = Fixture::single_cluster(&["S1", "S2", "S3"]);
        fx.spu("P1", "Tops", 100.0);
        fx.fact("S1", "P1", 10.0, 5000.0, 5.0)
            .fact("S2", "P1", 10.0, 5000.0, 5.0);
        let mut cfg = PipelineConfig::default();
        cfg.rules.missing_spu.adoption_threshold = 0.5;
        let recs = evaluate_missing_spu(&fx.context(), &cfg).unwrap();
        assert!(recs.is_empty(), "cluster of 3 is below min_cluster_size 5");
    }

    #[test]
    fn test_low_opportunity_suppressed() {
        let fx = adopted_fixture();
        let mut cfg = PipelineConfig::default();
        cfg.rules.missing_spu.adoption_threshold = 0.9;
        cfg.rules.missing_spu.min_total_opportunity = 5000.0;
        // One missing store x mean sales 3000 < 5000.
        let recs = evaluate_missing_spu(&fx.context(), &cfg).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_per_store_cap() {
        let ids: Vec<String> = (1..=6).map(|i| format!("S{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut fx = Fixture::single_cluster(&refs);
        // Five SPUs fully adopted except by S6.
        for p in 1..=5 {
            let spu = format!("P{p}");
            fx.spu(&spu, "Tops", 100.0);
            for id in ids.iter().take(5) {
                fx.fact(id, &spu, 10.0, 3000.0 + p as f64, 5.0);
            }
        }
        fx.spu("PX", "Tops", 100.0);
        fx.fact("S6", "PX", 10.0, 1000.0, 5.0);

        let mut cfg = PipelineConfig::default();
        cfg.rules.missing_spu.adoption_threshold = 0.8;
        let recs = evaluate_missing_spu(&fx.context(), &cfg).unwrap();
        let s6: Vec<_> = recs.iter().filter(|r| r.store_id == "S6").collect();
        assert_eq!(s6.len(), cfg.rules.missing_spu.max_missing_spus_per_store);
    }

    #[test]
    fn test_no_sales_is_rule_input_error() {
        let fx = Fixture::single_cluster(&["S1", "S2"]);
        let err = evaluate_missing_spu(&fx.context(), &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::RuleInput { .. }));
    }
}
