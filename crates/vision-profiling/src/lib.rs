//! Streaming statistical profiler for computer-vision datasets.
//!
//! Profiles classification, detection and segmentation datasets before
//! training: batches are streamed from user-supplied iterables, normalized
//! into a canonical image/label representation, and fanned out to a set of
//! independent statistical feature extractors whose per-split state is
//! aggregated into tables and plot descriptors for a report.
//!
//! # Overview
//!
//! - **Dataset adapter**: maps arbitrary batch structures (tensors,
//!   sequences, mappings, nested) to an `(images, labels)` pair. Resolution
//!   runs once per run (positionally, via registered shape detectors, or
//!   through a single interactive question) and is memoized for every
//!   subsequent batch of both splits.
//! - **Batch processors**: task-specific normalization into a
//!   [`CanonicalBatch`] (channel-first images, thresholded segmentation
//!   masks with per-class contours, detection boxes in canonical
//!   `(class_id, x1, y1, x2, y2)` order).
//! - **Feature extractors**: capability-typed accumulators with an
//!   `update`/`aggregate` contract, split-aware state, and empty-state-safe
//!   aggregation into [`Feature`] records.
//! - **Orchestrator**: a `Build -> Validate -> Run -> Aggregate -> Done`
//!   state machine with bounded batch count, asymmetric train/val early
//!   termination, per-batch shape-failure containment, and per-extractor
//!   soft-disable on update failure.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vision_profiling::{AnalysisConfig, AnalysisRunner, Task};
//!
//! let config = AnalysisConfig::builder()
//!     .task(Task::Segmentation)
//!     .n_classes(21)
//!     .ignore_labels(vec![0])
//!     .batches_early_stop(500)
//!     .build()?;
//!
//! let report = AnalysisRunner::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .run(train_batches, Some(val_batches))?;
//!
//! for feature in &report.features {
//!     println!("{}: {} rows", feature.name, feature.train.as_ref().unwrap().data.height());
//! }
//! ```
//!
//! # Concurrency
//!
//! Extractor updates for one batch run concurrently on a bounded worker
//! pool; the orchestrator joins the fan-out before pulling the next batch.
//! [`ExecutionMode::Sequential`] runs extractors on the calling thread in
//! registration order and produces aggregates identical to parallel mode.
//!
//! # Out of scope
//!
//! Report rendering, plotting backends, answer persistence and dataset
//! loading are external collaborators: the core hands out [`Feature`]
//! records and a [`CacheDocument`] and performs no file I/O itself.

pub mod adapter;
pub mod aggregation;
pub mod batch;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod processors;

// Re-exports for convenient access
pub use adapter::{
    Answerer, CacheDocument, ClosureAnswerer, DatasetAdapter, Question, QuestionOption,
    TensorExtractor,
};
pub use batch::{
    AccessPath, AccessStep, BBox, CanonicalBatch, CanonicalLabels, ClassNameTable, Contour,
    RawBatch, Split, TensorRole,
};
pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, BboxFormat, ConfigValidationError, ExecutionMode, Task,
};
pub use error::{AnalysisError, Result, ResultExt};
pub use features::{
    BarPlotOptions, Feature, FeatureExtractor, FeatureRegistry, PlotOptions, ViolinPlotOptions,
};
pub use pipeline::{
    AnalysisRunner, AnalysisRunnerBuilder, AnalysisStage, AnalysisState, CancellationToken,
    ClosureProgressReporter, DynExtractorFactory, FeatureReport, ProgressReporter, ProgressUpdate,
    RunReport, RunSummary,
};
pub use processors::TaskProcessor;
