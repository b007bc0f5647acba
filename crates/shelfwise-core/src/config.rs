//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is passed into every component; all
//! recognized keys are enumerated here with their defaults. Thresholds that
//! the source data calibrated over several iterations (R8 z-threshold, R7
//! adoption) default to the most recent calibration but stay configurable.

use crate::error::{PipelineError, Result};
use crate::types::PriceBand;
use serde::{Deserialize, Serialize};

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed for every randomized step (K-means initialization).
    pub seed: u64,
    pub features: FeatureConfig,
    pub clustering: ClusteringConfig,
    pub rules: RuleConfig,
    pub sanity: SanityCaps,
    pub sell_through: SellThroughConfig,
    pub allocator: AllocatorConfig,
    pub price_bands: PriceBandBounds,
}

/// Feature assembly (C1) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// SPU matrix keeps the top-N SPUs by total sales.
    pub top_n_spus: usize,
    /// Minimum distinct weather days per store.
    pub min_weather_days: usize,
    /// Minimum distinct SPUs with sales per store.
    pub min_skus: usize,
    /// The run aborts when more than this fraction of stores is dropped.
    pub max_drop_ratio: f64,
    pub weights: FeatureWeights,
    pub pca: PcaConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            top_n_spus: 1000,
            min_weather_days: 30,
            min_skus: 10,
            max_drop_ratio: 0.20,
            weights: FeatureWeights::default(),
            pca: PcaConfig::default(),
        }
    }
}

/// Semantic weight of each feature group in the assembled matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub sales: f64,
    pub style: f64,
    pub capacity: f64,
    pub temperature: f64,
    pub geography: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            sales: 0.40,
            style: 0.20,
            capacity: 0.10,
            temperature: 0.20,
            geography: 0.10,
        }
    }
}

/// Per-family PCA component counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    pub spu_components: usize,
    pub subcategory_components: usize,
    pub category_components: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            spu_components: 100,
            subcategory_components: 50,
            category_components: 20,
        }
    }
}

/// Clustering engine (C2) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Expected stores per cluster within a temperature band.
    pub target_cluster_size: usize,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    /// Width of a feels-like temperature band in degrees Celsius.
    pub temperature_band_width: f64,
    /// Combined style/size coherence below this triggers a weighted re-fit.
    pub coherence_threshold: f64,
    /// Lloyd iteration cap per K-means fit.
    pub max_iterations: usize,
    /// Rebalancing pass cap.
    pub max_balance_iterations: usize,
    /// Overall silhouette below this fails validation.
    pub min_silhouette: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            target_cluster_size: 50,
            min_cluster_size: 50,
            max_cluster_size: 50,
            temperature_band_width: 5.0,
            coherence_threshold: 0.6,
            max_iterations: 100,
            max_balance_iterations: 20,
            min_silhouette: -0.5,
        }
    }
}

/// Per-rule thresholds for the rule engine (C4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub missing_spu: MissingSpuConfig,
    pub imbalance: ImbalanceConfig,
    pub below_minimum: BelowMinimumConfig,
    pub overcapacity: OvercapacityConfig,
    pub missed_sales: MissedSalesConfig,
    pub performance_gap: PerformanceGapConfig,
}

/// R7 — missing SPU / subcategory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingSpuConfig {
    /// Fraction of cluster members that must stock an SPU for it to count
    /// as cluster-adopted. Earlier calibrations used 0.70 and 0.90.
    pub adoption_threshold: f64,
    /// Minimum total cluster sales for an adopted SPU.
    pub min_sales_threshold: f64,
    pub max_missing_spus_per_store: usize,
    /// Clusters smaller than this emit nothing.
    pub min_cluster_size: usize,
    /// Minimum total opportunity per (cluster, SPU) to emit.
    pub min_total_opportunity: f64,
}

impl Default for MissingSpuConfig {
    fn default() -> Self {
        Self {
            adoption_threshold: 0.98,
            min_sales_threshold: 3000.0,
            max_missing_spus_per_store: 3,
            min_cluster_size: 5,
            min_total_opportunity: 2000.0,
        }
    }
}

/// R8 — imbalanced allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImbalanceConfig {
    /// |Z| strictly above this is flagged. The original 2.0 produced
    /// excessive flags; 4.0 and 6.0 were later calibrations.
    pub z_threshold: f64,
    pub max_adjustments_per_store: usize,
    /// Adjustments below this many units are skipped.
    pub min_adjustment_quantity: f64,
    /// Adjustments below this value are skipped.
    pub min_adjustment_value: f64,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            z_threshold: 6.0,
            max_adjustments_per_store: 5,
            min_adjustment_quantity: 15.0,
            min_adjustment_value: 1000.0,
        }
    }
}

/// R9 — below-minimum subcategory coverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BelowMinimumConfig {
    pub min_styles_per_subcategory: usize,
    /// Target is max(minimum, this fraction of the cluster benchmark).
    pub benchmark_fraction: f64,
}

impl Default for BelowMinimumConfig {
    fn default() -> Self {
        Self {
            min_styles_per_subcategory: 2,
            benchmark_fraction: 0.8,
        }
    }
}

/// Threshold profile for R10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OvercapacityProfile {
    Strict,
    Standard,
    Lenient,
}

impl OvercapacityProfile {
    /// (velocity percentile, allocation multiple, max utilization).
    pub fn thresholds(&self) -> (f64, f64, f64) {
        match self {
            OvercapacityProfile::Strict => (90.0, 1.5, 0.75),
            OvercapacityProfile::Standard => (80.0, 1.2, 0.85),
            OvercapacityProfile::Lenient => (70.0, 1.1, 0.90),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OvercapacityProfile::Strict => "strict",
            OvercapacityProfile::Standard => "standard",
            OvercapacityProfile::Lenient => "lenient",
        }
    }
}

/// R10 — smart overcapacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OvercapacityConfig {
    pub profile: OvercapacityProfile,
    /// Strategic increase applied to qualifying top performers.
    pub increase_fraction: f64,
}

impl Default for OvercapacityConfig {
    fn default() -> Self {
        Self {
            profile: OvercapacityProfile::Standard,
            increase_fraction: 0.15,
        }
    }
}

/// R11 — missed sales.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissedSalesConfig {
    /// Stores with sell-through below this are examined for missed sales.
    pub min_sell_through: f64,
}

impl Default for MissedSalesConfig {
    fn default() -> Self {
        Self {
            min_sell_through: 0.15,
        }
    }
}

/// R12 — sales performance gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceGapConfig {
    /// Z strictly below this flags a store.
    pub z_flag_threshold: f64,
    pub max_increase_per_store: i64,
    /// Keep only the top-N opportunities per store.
    pub top_opportunities: usize,
    pub min_roi: f64,
    /// Required |Z| gap to the cluster benchmark.
    pub min_opportunity_gap: f64,
    /// Benchmark percentile of per-store sales within the cluster.
    pub benchmark_percentile: usize,
}

impl Default for PerformanceGapConfig {
    fn default() -> Self {
        Self {
            z_flag_threshold: -1.5,
            max_increase_per_store: 40,
            top_opportunities: 3,
            min_roi: 0.25,
            min_opportunity_gap: 2.0,
            benchmark_percentile: 75,
        }
    }
}

/// Universal sanity caps applied to every rule's output and again after
/// consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityCaps {
    pub max_total_spu_changes_per_store: usize,
    pub max_total_quantity_changes_per_store: i64,
    pub max_investment_per_store: f64,
}

impl Default for SanityCaps {
    fn default() -> Self {
        Self {
            max_total_spu_changes_per_store: 5,
            max_total_quantity_changes_per_store: 50,
            max_investment_per_store: 8000.0,
        }
    }
}

/// Sell-through validator gate and role derivation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SellThroughConfig {
    /// Recommendations pushing predicted sell-through below this are rejected.
    pub min_predicted_sell_through: f64,
    /// Required predicted improvement over the current sell-through.
    pub min_sell_through_improvement: f64,
    /// Predicted sell-through above this signals stock-out risk.
    pub max_sell_through_risk: f64,
    /// Role boundaries: Core >= core, Seasonal >= seasonal, Filler >= filler.
    pub core_threshold: f64,
    pub seasonal_threshold: f64,
    pub filler_threshold: f64,
}

impl Default for SellThroughConfig {
    fn default() -> Self {
        Self {
            min_predicted_sell_through: 0.50,
            min_sell_through_improvement: 0.05,
            max_sell_through_risk: 0.80,
            core_threshold: 0.80,
            seasonal_threshold: 0.40,
            filler_threshold: 0.20,
        }
    }
}

/// Group-to-store allocator (C5) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Exponent on the sales-share term.
    pub alpha_sales: f64,
    /// Exponent on the capacity-headroom term.
    pub beta_cap: f64,
    /// Exponent on the suitability term.
    pub gamma_fit: f64,
    /// Hard per-store cap in units per group.
    pub max_per_store: i64,
    /// Headroom fraction to units conversion scale.
    pub headroom_unit_scale: f64,
    /// Stores at or above this utilization receive a zero cap.
    pub capacity_max_util: f64,
    /// Run the global sell-through optimizer after LRM allocation.
    pub optimizer_enabled: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            alpha_sales: 0.6,
            beta_cap: 0.3,
            gamma_fit: 0.1,
            max_per_store: 10,
            headroom_unit_scale: 10.0,
            capacity_max_util: 0.9,
            optimizer_enabled: false,
        }
    }
}

/// Upper price boundaries for the first four bands; everything above the last
/// boundary is Luxury.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceBandBounds {
    pub economy_max: f64,
    pub value_max: f64,
    pub standard_max: f64,
    pub premium_max: f64,
}

impl Default for PriceBandBounds {
    fn default() -> Self {
        Self {
            economy_max: 99.0,
            value_max: 199.0,
            standard_max: 399.0,
            premium_max: 799.0,
        }
    }
}

impl PriceBandBounds {
    pub fn classify(&self, price: f64) -> PriceBand {
        if price <= self.economy_max {
            PriceBand::Economy
        } else if price <= self.value_max {
            PriceBand::Value
        } else if price <= self.standard_max {
            PriceBand::Standard
        } else if price <= self.premium_max {
            PriceBand::Premium
        } else {
            PriceBand::Luxury
        }
    }
}

impl PipelineConfig {
    /// Reject out-of-range parameters before the run starts.
    pub fn validate(&self) -> Result<()> {
        check_fraction("features.max_drop_ratio", self.features.max_drop_ratio)?;
        check_fraction(
            "clustering.coherence_threshold",
            self.clustering.coherence_threshold,
        )?;
        check_positive(
            "clustering.temperature_band_width",
            self.clustering.temperature_band_width,
        )?;
        if self.clustering.target_cluster_size == 0 {
            return Err(invalid(
                "clustering.target_cluster_size",
                "0",
                "must be at least 1",
            ));
        }
        if self.clustering.min_cluster_size == 0 {
            return Err(invalid(
                "clustering.min_cluster_size",
                "0",
                "must be at least 1",
            ));
        }
        if self.clustering.max_cluster_size < self.clustering.min_cluster_size {
            return Err(invalid(
                "clustering.max_cluster_size",
                &self.clustering.max_cluster_size.to_string(),
                "must be >= min_cluster_size",
            ));
        }
        check_fraction(
            "rules.missing_spu.adoption_threshold",
            self.rules.missing_spu.adoption_threshold,
        )?;
        check_positive("rules.imbalance.z_threshold", self.rules.imbalance.z_threshold)?;
        check_fraction(
            "rules.missed_sales.min_sell_through",
            self.rules.missed_sales.min_sell_through,
        )?;
        if self.rules.performance_gap.benchmark_percentile > 100 {
            return Err(invalid(
                "rules.performance_gap.benchmark_percentile",
                &self.rules.performance_gap.benchmark_percentile.to_string(),
                "must be in 0-100",
            ));
        }
        for (name, value) in [
            ("allocator.alpha_sales", self.allocator.alpha_sales),
            ("allocator.beta_cap", self.allocator.beta_cap),
            ("allocator.gamma_fit", self.allocator.gamma_fit),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(name, &value.to_string(), "must be >= 0"));
            }
        }
        check_fraction(
            "allocator.capacity_max_util",
            self.allocator.capacity_max_util,
        )?;
        check_fraction(
            "sell_through.min_predicted_sell_through",
            self.sell_through.min_predicted_sell_through,
        )?;
        check_fraction(
            "sell_through.max_sell_through_risk",
            self.sell_through.max_sell_through_risk,
        )?;
        Ok(())
    }
}

fn invalid(param: &str, value: &str, reason: &str) -> PipelineError {
    PipelineError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(name, &value.to_string(), "must be in [0, 1]"));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(name, &value.to_string(), "must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_negative_exponent_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.allocator.alpha_sales = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_cluster_size_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.clustering.min_cluster_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.rules.missing_spu.adoption_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_price_band_classification() {
        let bounds = PriceBandBounds::default();
        assert_eq!(bounds.classify(50.0), PriceBand::Economy);
        assert_eq!(bounds.classify(99.0), PriceBand::Economy);
        assert_eq!(bounds.classify(150.0), PriceBand::Value);
        assert_eq!(bounds.classify(399.0), PriceBand::Standard);
        assert_eq!(bounds.classify(500.0), PriceBand::Premium);
        assert_eq!(bounds.classify(1200.0), PriceBand::Luxury);
    }

    #[test]
    fn test_overcapacity_profiles() {
        assert_eq!(
            OvercapacityProfile::Strict.thresholds(),
            (90.0, 1.5, 0.75)
        );
        assert_eq!(
            OvercapacityProfile::Standard.thresholds(),
            (80.0, 1.2, 0.85)
        );
        assert_eq!(
            OvercapacityProfile::Lenient.thresholds(),
            (70.0, 1.1, 0.90)
        );
    }
}
