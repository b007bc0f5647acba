//! Rule engine: six statistical business rules over validated clusters.
//!
//! Each rule is a function from the shared [`RuleContext`] to a stream of
//! [`Recommendation`]s, which keeps the rules structurally uniform. The
//! runner applies the universal sanity caps and the sell-through gate to
//! every rule's output before emission, skips rules whose required inputs
//! are absent, and stable-sorts the surviving stream.

mod below_minimum;
pub(crate) mod context;
mod imbalance;
mod missed_sales;
mod missing_spu;
mod overcapacity;
mod performance_gap;

pub use below_minimum::evaluate_below_minimum;
pub use context::{ClusterMembers, ClusterSpuStats, RuleContext, SpuPosition, SubcatPosition};
pub use imbalance::evaluate_imbalance;
pub use missed_sales::evaluate_missed_sales;
pub use missing_spu::evaluate_missing_spu;
pub use overcapacity::evaluate_overcapacity;
pub use performance_gap::evaluate_performance_gap;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::report::{RejectedRecommendation, SkippedRule};
use crate::sellthrough::SellThroughValidator;
use crate::types::StyleTags;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// The six business rules, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleId {
    MissingSpu,
    ImbalancedAllocation,
    BelowMinimum,
    SmartOvercapacity,
    MissedSales,
    PerformanceGap,
}

impl RuleId {
    pub fn code(&self) -> &'static str {
        match self {
            RuleId::MissingSpu => "R7",
            RuleId::ImbalancedAllocation => "R8",
            RuleId::BelowMinimum => "R9",
            RuleId::SmartOvercapacity => "R10",
            RuleId::MissedSales => "R11",
            RuleId::PerformanceGap => "R12",
        }
    }

    pub fn all() -> [RuleId; 6] {
        [
            RuleId::MissingSpu,
            RuleId::ImbalancedAllocation,
            RuleId::BelowMinimum,
            RuleId::SmartOvercapacity,
            RuleId::MissedSales,
            RuleId::PerformanceGap,
        ]
    }
}

/// What a recommendation points at: a concrete SPU, or a subcategory pool
/// that the allocator later decomposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecommendationTarget {
    Spu(String),
    Subcategory(String),
}

impl RecommendationTarget {
    /// The fingerprint key component.
    pub fn key(&self) -> &str {
        match self {
            RecommendationTarget::Spu(id) => id,
            RecommendationTarget::Subcategory(name) => name,
        }
    }

    pub fn spu_id(&self) -> Option<&str> {
        match self {
            RecommendationTarget::Spu(id) => Some(id),
            RecommendationTarget::Subcategory(_) => None,
        }
    }
}

/// One store-level action proposal with rationale and confidence.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub rule_id: RuleId,
    /// All rules that flagged this (store, target); grows at consolidation.
    pub rule_ids: Vec<RuleId>,
    pub store_id: String,
    pub cluster_id: usize,
    pub target: RecommendationTarget,
    pub category: String,
    pub subcategory: String,
    pub tags: StyleTags,
    pub current_qty: i64,
    pub target_qty: i64,
    pub delta_qty: i64,
    pub investment_delta: f64,
    pub expected_benefit: f64,
    pub confidence: f64,
    pub rationale: String,
}

impl Recommendation {
    /// Consolidation key: one row per (store, SPU-or-subcategory) survives.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.store_id, self.target.key())
    }

    /// Consolidation priority.
    pub fn priority(&self) -> f64 {
        self.confidence * self.expected_benefit.abs()
    }

    /// Joined rule codes, e.g. `R7,R12`.
    pub fn rule_codes(&self) -> String {
        self.rule_ids
            .iter()
            .map(|r| r.code())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Everything the rule engine produced for one run.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub recommendations: Vec<Recommendation>,
    pub skipped: Vec<SkippedRule>,
    pub rejected: Vec<RejectedRecommendation>,
}

/// Map a |z| score to a confidence in [0.5, 1) via the standard normal CDF.
pub(crate) fn z_confidence(z: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.cdf(z.abs()))
        .unwrap_or(0.5)
        .clamp(0.0, 1.0)
}

/// Run all six rules, applying the universal sanity constraints to each
/// rule's output. A rule with missing inputs is skipped; other errors abort.
pub fn run_rules(
    ctx: &RuleContext,
    cfg: &PipelineConfig,
    validator: &SellThroughValidator,
) -> Result<RuleOutcome> {
    let mut outcome = RuleOutcome::default();

    for rule in RuleId::all() {
        let result = match rule {
            RuleId::MissingSpu => evaluate_missing_spu(ctx, cfg),
            RuleId::ImbalancedAllocation => evaluate_imbalance(ctx, cfg),
            RuleId::BelowMinimum => evaluate_below_minimum(ctx, cfg),
            RuleId::SmartOvercapacity => evaluate_overcapacity(ctx, cfg),
            RuleId::MissedSales => evaluate_missed_sales(ctx, cfg),
            RuleId::PerformanceGap => evaluate_performance_gap(ctx, cfg),
        };
        match result {
            Ok(recs) => {
                debug!(rule = rule.code(), produced = recs.len(), "rule evaluated");
                let kept = apply_sanity(recs, ctx, cfg, validator, &mut outcome.rejected);
                outcome.recommendations.extend(kept);
            }
            Err(PipelineError::RuleInput { rule: name, reason }) => {
                warn!(rule = %name, %reason, "rule skipped");
                outcome.skipped.push(SkippedRule {
                    rule_id: name,
                    reason,
                });
            }
            Err(other) => return Err(other),
        }
    }

    outcome.recommendations.sort_by(|a, b| {
        a.rule_id
            .cmp(&b.rule_id)
            .then_with(|| a.store_id.cmp(&b.store_id))
            .then_with(|| a.target.key().cmp(b.target.key()))
    });
    info!(
        recommendations = outcome.recommendations.len(),
        skipped = outcome.skipped.len(),
        rejected = outcome.rejected.len(),
        "rule engine finished"
    );
    Ok(outcome)
}

/// Sell-through gate plus per-store caps over one rule's output.
pub(crate) fn apply_sanity(
    recs: Vec<Recommendation>,
    ctx: &RuleContext,
    cfg: &PipelineConfig,
    validator: &SellThroughValidator,
    rejected: &mut Vec<RejectedRecommendation>,
) -> Vec<Recommendation> {
    // Gate first: a recommendation that hurts projected sell-through never
    // competes for the per-store budget. The gate predicts the store-level
    // rate; position-level rates would reject every low-performance rule by
    // construction.
    let mut gated = Vec::with_capacity(recs.len());
    for rec in recs {
        let current = ctx.store_sell_through(&rec.store_id);
        let role = ctx.role_for(&rec.target);
        match validator.check(current, role, rec.delta_qty) {
            Ok(_) => gated.push(rec),
            Err(gate) => rejected.push(RejectedRecommendation {
                rule_id: rec.rule_id.code().to_string(),
                store_id: rec.store_id.clone(),
                target: rec.target.key().to_string(),
                constraint: gate.constraint().to_string(),
            }),
        }
    }

    // Per-store budgets, highest priority first.
    let mut by_store: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    for rec in gated {
        by_store.entry(rec.store_id.clone()).or_default().push(rec);
    }

    let caps = &cfg.sanity;
    let mut kept = Vec::new();
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
            } else if quantity + rec.delta_qty.abs()
                > caps.max_total_quantity_changes_per_store
            {
                Some("max_total_quantity_changes_per_store")
            } else if investment + rec.investment_delta.max(0.0)
                > caps.max_investment_per_store
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
                    kept.push(rec);
                }
                Some(name) => rejected.push(RejectedRecommendation {
                    rule_id: rec.rule_id.code().to_string(),
                    store_id: rec.store_id.clone(),
                    target: rec.target.key().to_string(),
                    constraint: name.to_string(),
                }),
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rule_codes() {
        let codes: Vec<&str> = RuleId::all().iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["R7", "R8", "R9", "R10", "R11", "R12"]);
    }

    #[test]
    fn test_z_confidence_monotone() {
        assert_relative_eq!(z_confidence(0.0), 0.5, epsilon = 1e-9);
        assert!(z_confidence(2.0) > z_confidence(1.0));
        assert!(z_confidence(6.0) > 0.999);
        // Sign does not matter.
        assert_relative_eq!(z_confidence(-2.0), z_confidence(2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_fingerprint_and_codes() {
        let rec = Recommendation {
            rule_id: RuleId::MissingSpu,
            rule_ids: vec![RuleId::MissingSpu, RuleId::PerformanceGap],
            store_id: "S1".to_string(),
            cluster_id: 0,
            target: RecommendationTarget::Spu("P9".to_string()),
            category: "C".to_string(),
            subcategory: "SC".to_string(),
            tags: StyleTags::default(),
            current_qty: 0,
            target_qty: 3,
            delta_qty: 3,
            investment_delta: 300.0,
            expected_benefit: 900.0,
            confidence: 0.9,
            rationale: String::new(),
        };
        assert_eq!(rec.fingerprint(), "S1:P9");
        assert_eq!(rec.rule_codes(), "R7,R12");
        assert_relative_eq!(rec.priority(), 810.0);
    }
}
