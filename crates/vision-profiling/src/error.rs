//! Custom error types for the dataset analysis pipeline.
//!
//! This module provides a comprehensive error hierarchy using `thiserror`.
//! Fatal errors (extraction, configuration, validation) always surface to the
//! caller with the original context; batch-level and extractor-level errors
//! are contained by the orchestrator and summarized at the end of the run.

use thiserror::Error;

use crate::batch::TensorRole;
use crate::config::ConfigValidationError;

/// The main error type for the analysis pipeline.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Run was cancelled by user.
    #[error("Analysis cancelled")]
    Cancelled,

    /// A raw batch could not be mapped to an image or label tensor.
    ///
    /// Fatal: the user must supply an explicit extractor function for
    /// the named role.
    #[error(
        "Could not extract {role} from raw batch (observed {observed}). \
         Supply an explicit `{role}_extractor` function for your dataset."
    )]
    Extraction { role: TensorRole, observed: String },

    /// A batch failed shape normalization. The batch is skipped with a
    /// warning; the run continues.
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Invalid or conflicting configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigValidationError),

    /// The data iterables failed the pre-run sanity check.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A feature extractor's `update` or `aggregate` failed. The extractor
    /// is soft-disabled for further updates but still attempts to aggregate.
    #[error("Feature extractor '{name}' failed: {message}")]
    ExtractorRuntime { name: String, message: String },

    /// The interactive resolution collaborator failed or returned an
    /// out-of-range answer.
    #[error("Interactive resolution failed: {0}")]
    Interaction(String),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        AnalysisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code, e.g. for structured log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::Extraction { .. } => "EXTRACTION_FAILED",
            Self::Shape(_) => "SHAPE_MISMATCH",
            Self::Configuration(_) => "INVALID_CONFIG",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::ExtractorRuntime { .. } => "EXTRACTOR_RUNTIME",
            Self::Interaction(_) => "INTERACTION_FAILED",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is contained by the run loop (the batch or
    /// extractor is given up on, but the run itself continues).
    pub fn is_contained(&self) -> bool {
        match self {
            Self::Shape(_) | Self::ExtractorRuntime { .. } => true,
            Self::WithContext { source, .. } => source.is_contained(),
            _ => false,
        }
    }
}

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| AnalysisError::Polars(e).with_context(context))
    }
}
