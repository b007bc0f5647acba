//! Error types for the pipeline core.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the batch pipeline.
///
/// Recovery policy differs by kind: `RuleInput` skips the offending rule,
/// `InsufficientData` drops the offending store, `ClusteringQuality` is fatal
/// for the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing or malformed column '{column}' in {table}")]
    InputError { table: String, column: String },

    #[error("Insufficient data for {entity}: need at least {needed}, got {got}")]
    InsufficientData {
        entity: String,
        needed: usize,
        got: usize,
    },

    #[error("Clustering quality check failed: {0}")]
    ClusteringQuality(String),

    #[error("Rule {rule} is missing a required input: {reason}")]
    RuleInput { rule: String, reason: String },

    #[error("Recommendation rejected: {0}")]
    Validation(String),

    #[error("Invalid parameter '{param}' = '{value}': {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("Pipeline cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("Internal error: {0}")]
    Internal(String),
}
