//! Configuration types for the analysis pipeline.
//!
//! This module provides configuration options using the builder pattern.
//! Class identity is specified through exactly one of `n_classes` or
//! `class_names`; supplying both (or neither) is a configuration error
//! surfaced before any data is pulled.

use serde::{Deserialize, Serialize};

/// Analysis task kind. A closed set: the batch processor and the default
/// feature set are selected by this tag at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Classification,
    Detection,
    Segmentation,
}

impl Task {
    pub fn display_name(&self) -> &'static str {
        match self {
            Task::Classification => "Classification",
            Task::Detection => "Detection",
            Task::Segmentation => "Segmentation",
        }
    }
}

/// Layout of the four coordinate fields of a detection label row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BboxFormat {
    /// `(x1, y1, x2, y2)` corner coordinates.
    #[default]
    Xyxy,
    /// `(x, y, w, h)` top-left corner plus size.
    Xywh,
    /// `(cx, cy, w, h)` center plus size.
    Cxcywh,
}

/// How extractor updates for one batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Bounded worker pool; all extractor updates for a batch run
    /// concurrently, joined before the next batch is pulled.
    #[default]
    Parallel,
    /// All extractors run on the calling thread in registration order.
    /// Used for deterministic reproduction and debugging; must produce
    /// aggregates identical to parallel mode.
    Sequential,
}

/// Configuration for a dataset analysis run.
///
/// Use [`AnalysisConfig::builder()`] to create a validated configuration.
///
/// # Example
///
/// ```rust,ignore
/// use vision_profiling::{AnalysisConfig, Task};
///
/// let config = AnalysisConfig::builder()
///     .task(Task::Segmentation)
///     .n_classes(21)
///     .ignore_labels(vec![0])
///     .batches_early_stop(500)
///     .threshold_soft_labels(0.5)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Analysis task; selects the batch processor and default features.
    pub task: Task,

    /// All class names, index == class id. Derived from `n_classes` as
    /// `["0", "1", ...]` when only a count was supplied.
    pub class_names: Vec<String>,

    /// Subset of `class_names` to analyze. `None` means all.
    pub class_names_to_use: Option<Vec<String>>,

    /// Class ids excluded from analysis (e.g. background or void labels).
    pub ignore_labels: Vec<i64>,

    /// Maximum number of loop iterations before the run stops early.
    /// `None` runs until the train iterator is exhausted.
    pub batches_early_stop: Option<usize>,

    /// Reuse previously resolved extraction paths (and interactive answers
    /// persisted by an external collaborator) instead of re-resolving.
    pub use_cache: bool,

    /// Expected number of image channels. Default: 3.
    pub n_image_channels: usize,

    /// Threshold for converting soft segmentation masks to binary masks.
    /// Must lie strictly inside `(0, 1)`. Default: 0.5.
    pub threshold_soft_labels: f64,

    /// Coordinate layout of incoming detection boxes. Default: xyxy.
    pub bbox_format: BboxFormat,

    /// Whether the class id comes first in a detection label row
    /// (`(class_id, x, y, x, y)`) or last (`(x, y, x, y, class_id)`).
    pub is_label_first: bool,

    /// Scheduling of extractor updates. Default: parallel.
    pub execution: ExecutionMode,

    /// Worker pool size for parallel execution. `None` lets the pool pick.
    pub workers: Option<usize>,
}

impl AnalysisConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.class_names.is_empty() {
            return Err(ConfigValidationError::MissingClassSpec);
        }

        if let Some(subset) = &self.class_names_to_use {
            let unknown: Vec<String> = subset
                .iter()
                .filter(|name| !self.class_names.contains(name))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(ConfigValidationError::UnknownClassNamesToUse(unknown));
            }
        }

        if !(self.threshold_soft_labels > 0.0 && self.threshold_soft_labels < 1.0) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "threshold_soft_labels".to_string(),
                value: self.threshold_soft_labels,
            });
        }

        if self.n_image_channels == 0 {
            return Err(ConfigValidationError::InvalidChannelCount(
                self.n_image_channels,
            ));
        }

        if self.workers == Some(0) {
            return Err(ConfigValidationError::InvalidWorkerCount(0));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("`n_classes` and `class_names` cannot be specified at the same time")]
    MutuallyExclusiveClassSpec,

    #[error("Either `n_classes` or `class_names` must be specified")]
    MissingClassSpec,

    #[error("`class_names_to_use` contains classes not listed in `class_names`: {0:?}")]
    UnknownClassNamesToUse(Vec<String>),

    #[error("Invalid threshold for '{field}': {value} (must be strictly between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid image channel count: {0} (must be at least 1)")]
    InvalidChannelCount(usize),

    #[error("Invalid worker count: {0} (must be at least 1)")]
    InvalidWorkerCount(usize),

    #[error("`features` and `extractor_factories` cannot be specified at the same time")]
    MutuallyExclusiveFeatureSpec,

    #[error("Unknown feature extractor: '{0}'")]
    UnknownFeature(String),
}

/// Builder for [`AnalysisConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    task: Option<Task>,
    n_classes: Option<usize>,
    class_names: Option<Vec<String>>,
    class_names_to_use: Option<Vec<String>>,
    ignore_labels: Option<Vec<i64>>,
    batches_early_stop: Option<usize>,
    use_cache: Option<bool>,
    n_image_channels: Option<usize>,
    threshold_soft_labels: Option<f64>,
    bbox_format: Option<BboxFormat>,
    is_label_first: Option<bool>,
    execution: Option<ExecutionMode>,
    workers: Option<usize>,
}

impl AnalysisConfigBuilder {
    /// Set the analysis task.
    pub fn task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    /// Set the number of classes. Mutually exclusive with
    /// [`class_names`](Self::class_names); class names become `"0".."n-1"`.
    pub fn n_classes(mut self, n: usize) -> Self {
        self.n_classes = Some(n);
        self
    }

    /// Set the full class name list (index == class id). Mutually exclusive
    /// with [`n_classes`](Self::n_classes).
    pub fn class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = Some(names);
        self
    }

    /// Restrict analysis to a subset of `class_names`.
    pub fn class_names_to_use(mut self, names: Vec<String>) -> Self {
        self.class_names_to_use = Some(names);
        self
    }

    /// Set class ids to exclude from analysis (e.g. background).
    pub fn ignore_labels(mut self, labels: Vec<i64>) -> Self {
        self.ignore_labels = Some(labels);
        self
    }

    /// Bound the number of batch-loop iterations.
    pub fn batches_early_stop(mut self, n: usize) -> Self {
        self.batches_early_stop = Some(n);
        self
    }

    /// Enable reuse of previously resolved extraction paths.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    /// Set the expected number of image channels.
    pub fn n_image_channels(mut self, n: usize) -> Self {
        self.n_image_channels = Some(n);
        self
    }

    /// Set the soft-label binarization threshold, strictly inside `(0, 1)`.
    pub fn threshold_soft_labels(mut self, threshold: f64) -> Self {
        self.threshold_soft_labels = Some(threshold);
        self
    }

    /// Set the coordinate layout of incoming detection boxes.
    pub fn bbox_format(mut self, format: BboxFormat) -> Self {
        self.bbox_format = Some(format);
        self
    }

    /// Declare whether the class id leads a detection label row.
    pub fn is_label_first(mut self, label_first: bool) -> Self {
        self.is_label_first = Some(label_first);
        self
    }

    /// Set the extractor scheduling mode.
    pub fn execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = Some(mode);
        self
    }

    /// Bound the worker pool size for parallel execution.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `AnalysisConfig` or an error if validation fails.
    pub fn build(self) -> Result<AnalysisConfig, ConfigValidationError> {
        let class_names = match (self.n_classes, self.class_names) {
            (Some(_), Some(_)) => return Err(ConfigValidationError::MutuallyExclusiveClassSpec),
            (None, None) => return Err(ConfigValidationError::MissingClassSpec),
            (Some(n), None) => (0..n).map(|i| i.to_string()).collect(),
            (None, Some(names)) => names,
        };

        let config = AnalysisConfig {
            task: self.task.unwrap_or(Task::Classification),
            class_names,
            class_names_to_use: self.class_names_to_use,
            ignore_labels: self.ignore_labels.unwrap_or_default(),
            batches_early_stop: self.batches_early_stop,
            use_cache: self.use_cache.unwrap_or(false),
            n_image_channels: self.n_image_channels.unwrap_or(3),
            threshold_soft_labels: self.threshold_soft_labels.unwrap_or(0.5),
            bbox_format: self.bbox_format.unwrap_or_default(),
            is_label_first: self.is_label_first.unwrap_or(false),
            execution: self.execution.unwrap_or_default(),
            workers: self.workers,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_defaults() {
        let config = AnalysisConfig::builder()
            .task(Task::Detection)
            .n_classes(4)
            .build()
            .unwrap();
        assert_eq!(config.n_image_channels, 3);
        assert_eq!(config.threshold_soft_labels, 0.5);
        assert_eq!(config.bbox_format, BboxFormat::Xyxy);
        assert_eq!(config.execution, ExecutionMode::Parallel);
        assert!(!config.is_label_first);
        assert!(!config.use_cache);
        assert_eq!(config.class_names, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_n_classes_and_class_names_conflict() {
        let result = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(2)
            .class_names(vec!["cat".to_string(), "dog".to_string()])
            .build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::MutuallyExclusiveClassSpec
        ));
    }

    #[test]
    fn test_missing_class_spec() {
        let result = AnalysisConfig::builder().task(Task::Classification).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::MissingClassSpec
        ));
    }

    #[test]
    fn test_unknown_class_names_to_use() {
        let result = AnalysisConfig::builder()
            .task(Task::Detection)
            .class_names(vec!["car".to_string()])
            .class_names_to_use(vec!["truck".to_string()])
            .build();
        match result.unwrap_err() {
            ConfigValidationError::UnknownClassNamesToUse(unknown) => {
                assert_eq!(unknown, vec!["truck".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_threshold_bounds() {
        for bad in [0.0, 1.0, -0.2, 1.5] {
            let result = AnalysisConfig::builder()
                .task(Task::Segmentation)
                .n_classes(2)
                .threshold_soft_labels(bad)
                .build();
            assert!(
                matches!(
                    result.unwrap_err(),
                    ConfigValidationError::InvalidThreshold { .. }
                ),
                "threshold {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AnalysisConfig::builder()
            .task(Task::Detection)
            .n_classes(10)
            .bbox_format(BboxFormat::Cxcywh)
            .is_label_first(true)
            .batches_early_stop(64)
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        let back: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bbox_format, BboxFormat::Cxcywh);
        assert_eq!(back.batches_early_stop, Some(64));
        assert!(back.is_label_first);
    }
}
