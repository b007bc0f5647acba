//! Core library for the shelfwise store-clustering and
//! assortment-optimization pipeline.
//!
//! This crate implements the batch pipeline: feature assembly from sales and
//! weather data, temperature-banded constrained clustering, cluster
//! profiling, the six statistical business rules, and the consolidation and
//! allocation steps. Data download, report rendering, and CLI concerns live
//! in external collaborators.

pub mod allocate;
pub mod apportion;
pub mod cluster;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod features;
pub mod optimizer;
pub mod pca;
pub mod period;
pub mod pipeline;
pub mod profile;
pub mod quality;
pub mod report;
pub mod rules;
pub mod sellthrough;
pub mod types;
pub mod weather;

// Re-exports for convenience
pub use allocate::{allocate_groups, build_allocation_groups, AllocationGroup};
pub use apportion::{largest_remainder, Apportionment};
pub use cluster::{Cluster, ClusteringEngine, ClusteringState};
pub use config::{
    AllocatorConfig, ClusteringConfig, FeatureConfig, FeatureWeights, OvercapacityProfile,
    PipelineConfig, PriceBandBounds, RuleConfig, SanityCaps, SellThroughConfig,
};
pub use consolidate::{consolidate, Consolidated};
pub use error::{PipelineError, Result};
pub use features::{
    assemble_features, build_feature_matrix, build_sales_matrix, build_subcategory_matrix,
    FeatureFamily, FeatureMatrix, SalesMatrix,
};
pub use optimizer::{optimize, Candidate};
pub use pca::{reduce_block, reduce_feature_matrix};
pub use period::{Half, Period};
pub use pipeline::{run_pipeline, CancelFlag, PipelineInput, PipelineOutput};
pub use profile::{
    profile_clusters, BusinessTag, CapacityTag, CapacityTier, ClusterNarrative, ClusterProfile,
    GeoTag, OperationalTag, StyleClassification,
};
pub use quality::{
    band_compliance, calinski_harabasz, davies_bouldin, merchandising_coherence,
    silhouette_samples, ClusterQuality, QualityRating,
};
pub use report::{
    AllocatedStoreRow, ClusterAssignmentRow, ClusterLabelRow, DroppedStore, ReconciliationRow,
    RecommendationRow, RejectedRecommendation, RunDiagnostics, SkippedRule,
};
pub use rules::{
    run_rules, Recommendation, RecommendationTarget, RuleContext, RuleId, RuleOutcome,
};
pub use sellthrough::{
    derive_roles, role_multiplier, sell_through, GateRejection, SellThroughValidator,
};
pub use types::{
    DisplayLocation, Gender, PriceBand, ProductRole, SalesFact, Season, SizeTier, Spu, SpuStyle,
    Store, StoreStyle, StyleTags, WeatherSample,
};
pub use weather::{
    apparent_temperature, classify_temperature, compute_feels_like, StoreWeatherProfile,
    TempBand, TempClass,
};
