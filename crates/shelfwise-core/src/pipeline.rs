//! End-to-end pipeline: feature assembly through allocation.
//!
//! Components run once per run in dependency order, each consuming only its
//! predecessors' outputs. A cooperative cancellation flag is checked between
//! components; a cancelled run publishes nothing. All output tables are
//! stable-sorted so identical input and seed reproduce byte-identical
//! results.

use crate::cluster::ClusteringEngine;
use crate::config::PipelineConfig;
use crate::consolidate::consolidate;
use crate::error::{PipelineError, Result};
use crate::features::{build_feature_matrix, store_style_ratios};
use crate::optimizer::{optimize, Candidate};
use crate::pca::reduce_feature_matrix;
use crate::period::Period;
use crate::profile::profile_clusters;
use crate::report::{ClusterAssignmentRow, ClusterLabelRow, RecommendationRow, RunDiagnostics};
use crate::rules::{run_rules, Recommendation, RuleContext};
use crate::sellthrough::SellThroughValidator;
use crate::types::{SalesFact, Spu, Store, WeatherSample};
use crate::weather::{compute_feels_like, StoreWeatherProfile};
use crate::{allocate, report};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Read-only inputs for one run, materialized by the data collaborators.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub stores: Vec<Store>,
    pub spus: Vec<Spu>,
    pub sales: Vec<SalesFact>,
    pub weather: Vec<WeatherSample>,
    /// Most recent half-month of the analysis window.
    pub target_period: Period,
    /// Number of half-months in the analysis window, target included.
    pub window_periods: usize,
}

/// Every output table plus the partial-failure summary.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub assignments: Vec<ClusterAssignmentRow>,
    pub cluster_labels: Vec<ClusterLabelRow>,
    pub recommendations: Vec<RecommendationRow>,
    pub allocations: Vec<report::AllocatedStoreRow>,
    pub reconciliation: Vec<report::ReconciliationRow>,
    pub diagnostics: RunDiagnostics,
}

/// Cooperative cancellation flag checked between pipeline components.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn checkpoint(cancel: &CancelFlag, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

/// Run the whole pipeline over one input snapshot.
pub fn run_pipeline(
    input: &PipelineInput,
    config: &PipelineConfig,
    cancel: &CancelFlag,
) -> Result<PipelineOutput> {
    config.validate()?;
    let mut diagnostics = RunDiagnostics::default();

    // C1a: restrict sales to the analysis window.
    checkpoint(cancel, "feature assembly")?;
    let window = input
        .target_period
        .window_ending_here(input.window_periods.max(1));
    let facts: Vec<SalesFact> = input
        .sales
        .iter()
        .filter(|f| window.contains(&f.period))
        .cloned()
        .collect();
    info!(
        facts = facts.len(),
        periods = window.len(),
        target = %input.target_period,
        "windowed sales facts"
    );

    // C1b: weather profiles; stores with thin history are dropped here and
    // re-reported by the eligibility pass.
    let mut samples_by_store: BTreeMap<&str, Vec<WeatherSample>> = BTreeMap::new();
    for sample in &input.weather {
        samples_by_store
            .entry(sample.store_id.as_str())
            .or_default()
            .push(sample.clone());
    }
    let mut profiles: BTreeMap<String, StoreWeatherProfile> = BTreeMap::new();
    for store in &input.stores {
        let samples = samples_by_store
            .remove(store.store_id.as_str())
            .unwrap_or_default();
        match compute_feels_like(
            store,
            &samples,
            config.clustering.temperature_band_width,
            config.features.min_weather_days,
        ) {
            Ok(profile) => {
                profiles.insert(store.store_id.clone(), profile);
            }
            Err(PipelineError::InsufficientData { .. }) => {}
            Err(other) => return Err(other),
        }
    }

    // C1c: feature matrix over eligible stores.
    let (matrix, eligible, dropped) =
        build_feature_matrix(&input.stores, &facts, &input.spus, &profiles, &config.features)?;
    diagnostics.dropped_stores = dropped;

    // C2: PCA, banded K-means, balance, validate.
    checkpoint(cancel, "clustering")?;
    let reduced = reduce_feature_matrix(&matrix, &config.features.pca);
    let mut engine = ClusteringEngine::new(config.clustering.clone(), config.seed);
    engine.fit(&reduced, &profiles, &eligible)?;
    engine.balance()?;
    engine.validate()?;
    let clusters = engine.clusters()?;

    // C3: profiles and labels.
    checkpoint(cancel, "profiling")?;
    let spu_index: BTreeMap<String, &Spu> = input
        .spus
        .iter()
        .map(|s| (s.spu_id.clone(), s))
        .collect();
    let ratios = store_style_ratios(&facts, &spu_index);
    let cluster_profiles = profile_clusters(clusters, &eligible, &profiles, &ratios);

    let band_width = config.clustering.temperature_band_width;
    let mut assignments = Vec::new();
    for cluster in clusters {
        let profile = cluster_profiles
            .iter()
            .find(|p| p.cluster_id == cluster.cluster_id)
            .ok_or_else(|| {
                PipelineError::Internal(format!("no profile for cluster {}", cluster.cluster_id))
            })?;
        for &row in &cluster.members {
            assignments.push(ClusterAssignmentRow {
                store_id: eligible[row].store_id.clone(),
                cluster_id: cluster.cluster_id,
                temperature_band: cluster.band.label(band_width),
                silhouette: cluster.silhouette,
                operational_tag: profile.tag.to_string(),
            });
        }
    }
    assignments.sort_by(|a, b| {
        a.cluster_id
            .cmp(&b.cluster_id)
            .then_with(|| a.store_id.cmp(&b.store_id))
    });

    let mut cluster_labels: Vec<ClusterLabelRow> = cluster_profiles
        .iter()
        .map(|p| ClusterLabelRow {
            cluster_id: p.cluster_id,
            style_classification: p.style.as_str().to_string(),
            capacity_tier: p.capacity_tier.as_str().to_string(),
            quality_rating: p.quality.as_str().to_string(),
            title: p.narrative.title.clone(),
            who: p.narrative.who.clone(),
            why_grouped: p.narrative.why_grouped.clone(),
            business_value: p.narrative.business_value.clone(),
            actions: p.narrative.actions.clone(),
            success_metrics: p.narrative.success_metrics.clone(),
            size: p.member_count,
        })
        .collect();
    cluster_labels.sort_by_key(|l| l.cluster_id);

    // C4: the six rules.
    checkpoint(cancel, "rules")?;
    let ctx = RuleContext::build(
        &eligible,
        &input.spus,
        &facts,
        clusters,
        engine.store_ids(),
        &profiles,
        &config.sell_through,
    );
    let validator = SellThroughValidator::new(config.sell_through.clone());
    let outcome = run_rules(&ctx, config, &validator)?;
    diagnostics.skipped_rules = outcome.skipped;
    diagnostics.rejected_recommendations = outcome.rejected;

    // C5a: consolidation.
    checkpoint(cancel, "consolidation")?;
    let consolidated = consolidate(outcome.recommendations, &config.sanity);
    diagnostics
        .rejected_recommendations
        .extend(consolidated.rejected);

    // C5b: group decomposition and reconciliation.
    checkpoint(cancel, "allocation")?;
    let (groups, mut direct) = allocate::build_allocation_groups(&consolidated.rows);
    let (allocations, reconciliation) =
        allocate::allocate_groups(&groups, &ctx, &config.allocator);
    diagnostics.unallocatable_units_total = reconciliation
        .iter()
        .map(|r| r.unallocatable_units)
        .sum();

    // C5c: optional global refinement of the SPU-level rows.
    if config.allocator.optimizer_enabled {
        refine_direct_rows(&mut direct, &ctx, &validator);
    }

    // Consolidation already stable-sorted by (rule, store, target); keep
    // that order, swapping in the optimizer-refined copy where one exists.
    let recommendations: Vec<RecommendationRow> = consolidated
        .rows
        .iter()
        .map(|rec| {
            let source = direct
                .iter()
                .find(|d| d.fingerprint() == rec.fingerprint())
                .unwrap_or(rec);
            to_row(source)
        })
        .collect();

    info!(
        stores = eligible.len(),
        clusters = clusters.len(),
        recommendations = recommendations.len(),
        groups = groups.len(),
        "pipeline run complete"
    );
    Ok(PipelineOutput {
        assignments,
        cluster_labels,
        recommendations,
        allocations,
        reconciliation,
        diagnostics,
    })
}

fn to_row(rec: &Recommendation) -> RecommendationRow {
    RecommendationRow {
        fingerprint: rec.fingerprint(),
        store_id: rec.store_id.clone(),
        spu_id: rec.target.spu_id().unwrap_or_default().to_string(),
        category: rec.category.clone(),
        subcategory: rec.subcategory.clone(),
        rule_ids: rec.rule_codes(),
        current_qty: rec.current_qty,
        target_qty: rec.target_qty,
        delta_qty: rec.delta_qty,
        investment_delta: rec.investment_delta,
        expected_benefit: rec.expected_benefit,
        confidence: rec.confidence,
        rationale: rec.rationale.clone(),
    }
}

/// Trim SPU-level additions to the global capacity/inventory optimum.
fn refine_direct_rows(
    direct: &mut [Recommendation],
    ctx: &RuleContext,
    validator: &SellThroughValidator,
) {
    let mut capacities: BTreeMap<String, i64> = BTreeMap::new();
    let mut inventories: BTreeMap<String, i64> = BTreeMap::new();
    let mut candidates = Vec::new();
    for rec in direct.iter() {
        let Some(spu_id) = rec.target.spu_id() else {
            continue;
        };
        if rec.delta_qty <= 0 {
            continue;
        }
        let store = ctx.store(&rec.store_id);
        let headroom = store.map_or(0, |s| {
            (s.rack_capacity as f64 - ctx.total_stock(&rec.store_id)).max(0.0) as i64
        });
        capacities.insert(rec.store_id.clone(), headroom);
        *inventories.entry(spu_id.to_string()).or_insert(0) += rec.delta_qty;

        let current = ctx.store_sell_through(&rec.store_id);
        let predicted = validator.predict(current, ctx.role_for(&rec.target), rec.delta_qty);
        let gain = (predicted - current).max(0.0) / rec.delta_qty.max(1) as f64;
        candidates.push(Candidate {
            spu_id: spu_id.to_string(),
            store_id: rec.store_id.clone(),
            score: gain,
            requested: rec.delta_qty,
        });
    }

    let solution = optimize(&candidates, &capacities, &inventories);
    for rec in direct.iter_mut() {
        let Some(spu_id) = rec.target.spu_id() else {
            continue;
        };
        if rec.delta_qty <= 0 {
            continue;
        }
        let granted = solution
            .get(&(spu_id.to_string(), rec.store_id.clone()))
            .copied()
            .unwrap_or(0);
        if granted < rec.delta_qty {
            let unit_investment = rec.investment_delta / rec.delta_qty as f64;
            rec.delta_qty = granted;
            rec.target_qty = rec.current_qty + granted;
            rec.investment_delta = granted as f64 * unit_investment;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_aborts_before_first_stage() {
        let input = PipelineInput {
            stores: Vec::new(),
            spus: Vec::new(),
            sales: Vec::new(),
            weather: Vec::new(),
            target_period: "202406A".parse().unwrap(),
            window_periods: 2,
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = run_pipeline(&input, &PipelineConfig::default(), &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_before_running() {
        let input = PipelineInput {
            stores: Vec::new(),
            spus: Vec::new(),
            sales: Vec::new(),
            weather: Vec::new(),
            target_period: "202406A".parse().unwrap(),
            window_periods: 2,
        };
        let mut cfg = PipelineConfig::default();
        cfg.clustering.min_cluster_size = 0;
        let err = run_pipeline(&input, &cfg, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
    }
}
