//! Output table rows and the run diagnostics summary.
//!
//! These are the write-only contracts consumed by the reporting
//! collaborators. Fields are flattened to plain strings and numbers so a
//! renderer can emit a header row plus data rows without knowing any core
//! types. The core itself performs no I/O.

use serde::Serialize;

/// One row of the ClusterAssignments table.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterAssignmentRow {
    pub store_id: String,
    pub cluster_id: usize,
    /// Temperature band label, e.g. `[10,15)`.
    pub temperature_band: String,
    pub silhouette: f64,
    pub operational_tag: String,
}

/// One row of the ClusterLabels table.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterLabelRow {
    pub cluster_id: usize,
    pub style_classification: String,
    pub capacity_tier: String,
    pub quality_rating: String,
    pub title: String,
    pub who: String,
    pub why_grouped: String,
    pub business_value: String,
    pub actions: String,
    pub success_metrics: String,
    pub size: usize,
}

/// One row of the consolidated Recommendations table.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationRow {
    /// Consolidation key: `store_id:spu_or_subcategory`.
    pub fingerprint: String,
    pub store_id: String,
    /// Empty for subcategory-level recommendations.
    pub spu_id: String,
    pub category: String,
    pub subcategory: String,
    /// Comma-joined triggering rule codes, e.g. `R7,R12`.
    pub rule_ids: String,
    pub current_qty: i64,
    pub target_qty: i64,
    pub delta_qty: i64,
    pub investment_delta: f64,
    pub expected_benefit: f64,
    pub confidence: f64,
    pub rationale: String,
}

/// One row of the AllocatedStoreRecommendations table.
#[derive(Debug, Clone, Serialize)]
pub struct AllocatedStoreRow {
    pub group_id: String,
    pub store_id: String,
    pub cluster_id: usize,
    pub category: String,
    pub subcategory: String,
    pub season: String,
    pub gender: String,
    pub location: String,
    pub delta_qty_store: i64,
    pub delta_qty_group: i64,
    pub sales_weight: f64,
    pub capacity_weight: f64,
    pub suitability_weight: f64,
    pub composite_weight: f64,
    pub cap: i64,
    pub temp_season_factor: f64,
    pub style_alignment_factor: f64,
    pub rationale: String,
}

/// One row of the ReconciliationReport table.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationRow {
    pub group_id: String,
    pub cluster_id: usize,
    pub expected_delta_qty: i64,
    pub allocated_delta_qty: i64,
    pub unallocatable_units: i64,
    pub stores_at_cap: usize,
}

/// A store excluded from the run, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedStore {
    pub store_id: String,
    pub reason: String,
}

/// A rule skipped because a required input was absent.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub reason: String,
}

/// A recommendation dropped by a sanity cap or the sell-through gate.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecommendation {
    pub rule_id: String,
    pub store_id: String,
    pub target: String,
    /// The constraint that failed, e.g. `max_investment_per_store`.
    pub constraint: String,
}

/// Partial-failure summary for one run. Fatal failures never produce this;
/// they surface as errors from `run_pipeline`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDiagnostics {
    pub dropped_stores: Vec<DroppedStore>,
    pub skipped_rules: Vec<SkippedRule>,
    pub rejected_recommendations: Vec<RejectedRecommendation>,
    /// Sum of unallocatable units across all groups.
    pub unallocatable_units_total: i64,
}

impl RunDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.dropped_stores.is_empty()
            && self.skipped_rules.is_empty()
            && self.rejected_recommendations.is_empty()
            && self.unallocatable_units_total == 0
    }
}
