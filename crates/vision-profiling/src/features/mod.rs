//! Feature extractors: capability-typed accumulators over canonical batches.
//!
//! Each extractor is polymorphic over two operations: `update`, which folds
//! one canonical batch into the accumulator slice of that batch's split, and
//! `aggregate`, a pure function of the accumulated state producing a
//! [`Feature`] for one split. `aggregate` is idempotent and must handle the
//! empty state (zero batches seen) by flagging the feature rather than
//! failing.

pub mod classification;
pub mod common;
pub mod detection;
pub mod registry;
pub mod segmentation;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{CanonicalBatch, Split};
use crate::error::{AnalysisError, Result};

pub use registry::{ExtractorFactory, FeatureRegistry};

/// Options for rendering a bar plot of a feature table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarPlotOptions {
    /// Column of `Feature::data` holding the x-axis values.
    pub x_label_key: String,
    pub x_label_name: String,
    /// Column holding the bar heights.
    pub y_label_key: String,
    pub y_label_name: String,
    pub width: f64,
    pub x_ticks_rotation: Option<i32>,
    pub log_scale: bool,
}

impl BarPlotOptions {
    fn new(x_name: impl Into<String>, y_name: impl Into<String>) -> Self {
        BarPlotOptions {
            x_label_key: "bin".to_string(),
            x_label_name: x_name.into(),
            y_label_key: "value".to_string(),
            y_label_name: y_name.into(),
            width: 0.8,
            x_ticks_rotation: Some(45),
            log_scale: false,
        }
    }
}

/// Options for rendering a violin plot of a per-record feature table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolinPlotOptions {
    pub x_label_key: String,
    pub x_label_name: String,
    pub y_label_key: String,
    pub y_label_name: String,
    /// Column used to order the categorical axis.
    pub order_key: Option<String>,
    pub tight_layout: bool,
}

/// Plot descriptor handed to the external report renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotOptions {
    Bar(BarPlotOptions),
    Violin(ViolinPlotOptions),
}

/// The aggregation result of one extractor for one split.
///
/// Immutable once produced; handed to the external report renderer. The
/// core performs no rendering or file I/O itself.
#[derive(Debug, Clone)]
pub struct Feature {
    pub title: String,
    pub description: String,
    /// Table backing the plot.
    pub data: DataFrame,
    pub plot_options: PlotOptions,
    /// JSON-serializable summary of the aggregate.
    pub json: serde_json::Value,
    /// True when the split saw zero samples.
    pub empty: bool,
}

impl Feature {
    pub fn flagged_empty(mut self, empty: bool) -> Self {
        self.empty = empty;
        self
    }
}

/// Build a bar-plot feature from parallel bin/value columns.
pub(crate) fn bar_feature(
    title: impl Into<String>,
    description: impl Into<String>,
    x_name: impl Into<String>,
    y_name: impl Into<String>,
    bins: Vec<String>,
    values: Vec<f64>,
) -> Result<Feature> {
    let json = serde_json::Value::Array(
        bins.iter()
            .zip(&values)
            .map(|(bin, value)| serde_json::json!({ "bin": bin, "value": value }))
            .collect(),
    );
    let data = df!("bin" => &bins, "value" => &values)?;
    Ok(Feature {
        title: title.into(),
        description: description.into(),
        data,
        plot_options: PlotOptions::Bar(BarPlotOptions::new(x_name, y_name)),
        json,
        empty: false,
    })
}

/// A stateful per-split accumulator over canonical batches.
///
/// `update` is never called concurrently with itself, but runs concurrently
/// with other extractors' updates on the same batch; implementations must
/// not share mutable state. `aggregate` may be called repeatedly and must
/// return equivalent output for unchanged state.
pub trait FeatureExtractor: Send {
    fn name(&self) -> &'static str;

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()>;

    fn aggregate(&self, split: Split) -> Result<Feature>;
}

impl std::fmt::Debug for dyn FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("name", &self.name())
            .finish()
    }
}

/// Error for an extractor fed labels of the wrong task.
pub(crate) fn wrong_labels(
    name: &'static str,
    expected: &'static str,
    got: &'static str,
) -> AnalysisError {
    AnalysisError::ExtractorRuntime {
        name: name.to_string(),
        message: format!("expected {expected} labels, got {got}"),
    }
}
