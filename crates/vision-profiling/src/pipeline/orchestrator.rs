//! Analysis orchestrator: streams batches from the train/val iterables
//! through the adapter and batch processor, fans canonical batches out to
//! all registered extractors exactly once per batch, and drives the final
//! aggregation.
//!
//! The run is a state machine `Build -> Validate -> Run -> Aggregate ->
//! Done`, with `Failed` reachable from any state. Batch-level shape failures
//! and extractor-level update failures are contained and summarized; train
//! exhaustion ends the run early; val exhaustion mid-run switches the
//! remainder of the run to train-only.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::adapter::{Answerer, CacheDocument, DatasetAdapter, TensorExtractor};
use crate::batch::{ClassNameTable, RawBatch, Split, TensorRole};
use crate::config::{AnalysisConfig, ConfigValidationError};
use crate::error::{AnalysisError, Result};
use crate::features::{Feature, FeatureExtractor, FeatureRegistry};
use crate::pipeline::executor::{ExtractorSlot, FanOutExecutor};
use crate::pipeline::progress::{
    AnalysisStage, CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate,
};
use crate::processors::TaskProcessor;

/// Factory for custom extractor instances registered on the builder.
pub type DynExtractorFactory =
    Arc<dyn Fn(&AnalysisConfig, &Arc<ClassNameTable>) -> Box<dyn FeatureExtractor> + Send + Sync>;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Build,
    Validate,
    Run,
    Aggregate,
    Done,
    Failed,
}

/// Summary of contained failures and counters for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub train_batches: usize,
    pub val_batches: usize,
    /// Batches dropped by shape normalization failures.
    pub skipped_batches: usize,
    /// Extractors soft-disabled after an update failure, as `name (split)`.
    pub disabled_extractors: Vec<String>,
    /// Heuristic resolutions performed (at most one per tensor role).
    pub resolutions_performed: usize,
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn new() -> Self {
        RunSummary {
            started_at: Utc::now(),
            duration_ms: 0,
            train_batches: 0,
            val_batches: 0,
            skipped_batches: 0,
            disabled_extractors: Vec::new(),
            resolutions_performed: 0,
            warnings: Vec::new(),
        }
    }
}

/// Aggregated features of one extractor, paired across splits.
#[derive(Debug)]
pub struct FeatureReport {
    pub name: String,
    pub train: Option<Feature>,
    pub val: Option<Feature>,
}

/// Everything the external report renderer consumes.
#[derive(Debug)]
pub struct RunReport {
    pub features: Vec<FeatureReport>,
    pub summary: RunSummary,
}

/// The analysis orchestrator.
///
/// Use [`AnalysisRunner::builder()`] to configure and build a runner, then
/// [`run`](AnalysisRunner::run) it over the dataset iterables. A runner
/// drives a single run: extractor state lives for the run and is consumed
/// by aggregation.
pub struct AnalysisRunner {
    config: AnalysisConfig,
    class_table: Arc<ClassNameTable>,
    adapter: DatasetAdapter,
    processor: TaskProcessor,
    feature_names: Vec<String>,
    slots: Vec<ExtractorSlot>,
    executor: FanOutExecutor,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    state: AnalysisState,
}

impl std::fmt::Debug for AnalysisRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRunner")
            .field("feature_names", &self.feature_names)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(AnalysisRunner: Send);

impl AnalysisRunner {
    /// Create a new runner builder.
    pub fn builder() -> AnalysisRunnerBuilder {
        AnalysisRunnerBuilder::default()
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// The shared class-id → name table of this run.
    pub fn class_table(&self) -> &Arc<ClassNameTable> {
        &self.class_table
    }

    /// Snapshot of resolved extraction paths, for external persistence.
    pub fn cache_document(&self) -> CacheDocument {
        self.adapter.cache_document()
    }

    /// Run the analysis over the train (and optional val) iterables.
    ///
    /// Exhaustion of the train iterator ends the run early and is not an
    /// error; exhaustion of val alone switches the remainder of the run to
    /// train-only.
    pub fn run<I, J>(&mut self, train_data: I, val_data: Option<J>) -> Result<RunReport>
    where
        I: IntoIterator<Item = RawBatch>,
        J: IntoIterator<Item = RawBatch>,
    {
        match self.run_internal(train_data, val_data) {
            Ok(report) => {
                self.state = AnalysisState::Done;
                self.report_progress(ProgressUpdate::complete("Analysis completed"));
                Ok(report)
            }
            Err(e) => {
                self.state = AnalysisState::Failed;
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("analysis failed: {}", e);
                Err(e)
            }
        }
    }

    /// Convenience for a train-only run.
    pub fn run_train_only<I>(&mut self, train_data: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = RawBatch>,
    {
        self.run(train_data, Option::<Vec<RawBatch>>::None)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        Ok(())
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn run_internal<I, J>(&mut self, train_data: I, val_data: Option<J>) -> Result<RunReport>
    where
        I: IntoIterator<Item = RawBatch>,
        J: IntoIterator<Item = RawBatch>,
    {
        let start_time = Instant::now();
        let mut summary = RunSummary::new();

        // Validate: the train iterable must yield at least one batch; an
        // empty val iterable degrades to a train-only run.
        self.state = AnalysisState::Validate;
        self.report_progress(ProgressUpdate::new(
            AnalysisStage::Validate,
            0.0,
            "Validating data iterables",
        ));

        let mut train_iter = train_data.into_iter().peekable();
        if train_iter.peek().is_none() {
            return Err(AnalysisError::Validation(
                "train iterable yielded no batches".to_string(),
            ));
        }

        let val_supplied = val_data.is_some();
        let mut val_iter = val_data.map(|v| v.into_iter().peekable());
        let mut val_active = match &mut val_iter {
            Some(iter) => {
                if iter.peek().is_none() {
                    warn!("validation iterable yielded no batches; running train-only");
                    summary
                        .warnings
                        .push("validation iterable yielded no batches".to_string());
                    false
                } else {
                    true
                }
            }
            None => false,
        };

        // Run: bounded batch loop.
        self.state = AnalysisState::Run;
        info!(
            "starting analysis run ({} features, early stop = {:?})",
            self.feature_names.len(),
            self.config.batches_early_stop
        );

        let limit = self.config.batches_early_stop;
        let mut iteration = 0usize;
        loop {
            if limit.is_some_and(|l| iteration >= l) {
                info!("early stop after {} batches", iteration);
                break;
            }
            self.check_cancelled()?;

            let Some(raw) = train_iter.next() else {
                // Train exhaustion ends the run, regardless of val state.
                debug!("train iterator exhausted after {} batches", iteration);
                break;
            };
            self.process_one(raw, Split::Train, &mut summary)?;

            if val_active {
                match val_iter.as_mut().and_then(|iter| iter.next()) {
                    Some(raw) => self.process_one(raw, Split::Val, &mut summary)?,
                    None => {
                        info!("validation iterator exhausted; continuing train-only");
                        val_active = false;
                    }
                }
            }

            iteration += 1;
            self.report_progress(ProgressUpdate::with_batches(
                iteration,
                limit,
                format!("Processed batch {}", iteration),
            ));
        }

        // Aggregate: every (extractor, split) pair aggregates over whatever
        // state it has, possibly empty.
        self.state = AnalysisState::Aggregate;
        self.report_progress(ProgressUpdate::new(
            AnalysisStage::Aggregate,
            0.0,
            "Aggregating features",
        ));

        let mut features = Vec::with_capacity(self.feature_names.len());
        for name in &self.feature_names {
            let train = self.aggregate_one(name, Split::Train, &mut summary.warnings);
            let val = if val_supplied {
                self.aggregate_one(name, Split::Val, &mut summary.warnings)
            } else {
                None
            };
            features.push(FeatureReport {
                name: name.clone(),
                train,
                val,
            });
        }

        summary.resolutions_performed = self.adapter.resolution_count();
        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "analysis complete: {} train / {} val batches, {} skipped, {} extractors disabled",
            summary.train_batches,
            summary.val_batches,
            summary.skipped_batches,
            summary.disabled_extractors.len()
        );

        Ok(RunReport { features, summary })
    }

    /// Adapt, process and fan out one raw batch. Shape failures skip the
    /// batch; extractor failures soft-disable the extractor.
    fn process_one(&mut self, raw: RawBatch, split: Split, summary: &mut RunSummary) -> Result<()> {
        let (images, labels): (ArrayD<f32>, ArrayD<f32>) = self.adapter.adapt(&raw)?;

        let batch = match self.processor.process(images, labels, split) {
            Ok(batch) => batch,
            Err(AnalysisError::Shape(message)) => {
                warn!("skipping {} batch: {}", split, message);
                summary.skipped_batches += 1;
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        for (index, err) in self.executor.dispatch(&mut self.slots, &batch) {
            let slot = &mut self.slots[index];
            warn!(
                "extractor '{}' ({}) failed and is disabled for the rest of the run: {}",
                slot.name, slot.split, err
            );
            slot.disabled = true;
            summary
                .disabled_extractors
                .push(format!("{} ({})", slot.name, slot.split));
        }

        match split {
            Split::Train => summary.train_batches += 1,
            Split::Val => summary.val_batches += 1,
        }
        Ok(())
    }

    fn aggregate_one(
        &self,
        name: &str,
        split: Split,
        warnings: &mut Vec<String>,
    ) -> Option<Feature> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.name == name && slot.split == split)?;
        match slot.extractor.aggregate(split) {
            Ok(feature) => Some(feature),
            Err(e) => {
                warn!("aggregation of '{}' ({}) failed: {}", name, split, e);
                warnings.push(format!("aggregation of {} ({}) failed: {}", name, split, e));
                None
            }
        }
    }
}

/// Builder for [`AnalysisRunner`].
///
/// # Example
///
/// ```rust,ignore
/// use vision_profiling::{AnalysisConfig, AnalysisRunner, Task};
///
/// let config = AnalysisConfig::builder()
///     .task(Task::Detection)
///     .class_names(class_names)
///     .batches_early_stop(500)
///     .build()?;
///
/// let report = AnalysisRunner::builder()
///     .config(config)
///     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
///     .build()?
///     .run(train_batches, Some(val_batches))?;
/// ```
#[derive(Default)]
pub struct AnalysisRunnerBuilder {
    config: Option<AnalysisConfig>,
    features: Option<Vec<String>>,
    extractor_factories: Option<Vec<(String, DynExtractorFactory)>>,
    images_extractor: Option<TensorExtractor>,
    labels_extractor: Option<TensorExtractor>,
    answerer: Option<Arc<dyn Answerer>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
    cache: Option<CacheDocument>,
}

static_assertions::assert_impl_all!(AnalysisRunnerBuilder: Send);

impl AnalysisRunnerBuilder {
    /// Set the run configuration (required).
    pub fn config(mut self, config: AnalysisConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Select features by registry name instead of the task default set.
    /// Mutually exclusive with
    /// [`extractor_factories`](Self::extractor_factories).
    pub fn features(mut self, names: Vec<String>) -> Self {
        self.features = Some(names);
        self
    }

    /// Supply custom extractor factories instead of registry names.
    /// Mutually exclusive with [`features`](Self::features).
    pub fn extractor_factories(mut self, factories: Vec<(String, DynExtractorFactory)>) -> Self {
        self.extractor_factories = Some(factories);
        self
    }

    /// Explicit image extraction function, bypassing heuristic resolution.
    pub fn images_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&RawBatch) -> Result<ArrayD<f32>> + Send + Sync + 'static,
    {
        self.images_extractor = Some(TensorExtractor::Custom(Arc::new(f)));
        self
    }

    /// Explicit label extraction function, bypassing heuristic resolution.
    pub fn labels_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&RawBatch) -> Result<ArrayD<f32>> + Send + Sync + 'static,
    {
        self.labels_extractor = Some(TensorExtractor::Custom(Arc::new(f)));
        self
    }

    /// Collaborator answering interactive resolution questions.
    pub fn answerer(mut self, answerer: Arc<dyn Answerer>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    /// Set a progress reporter for receiving updates during the run.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the run between batches.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Restore resolved extraction paths persisted by a previous run.
    /// Applied only when `use_cache` is set in the configuration.
    pub fn cache_document(mut self, doc: CacheDocument) -> Self {
        self.cache = Some(doc);
        self
    }

    /// Build the runner (the `Build` state of the run).
    ///
    /// Fails fast on configuration conflicts, before any data is pulled.
    pub fn build(self) -> Result<AnalysisRunner> {
        let config = self
            .config
            .ok_or(AnalysisError::Configuration(
                ConfigValidationError::MissingClassSpec,
            ))?;
        config.validate()?;

        if self.features.is_some() && self.extractor_factories.is_some() {
            return Err(AnalysisError::Configuration(
                ConfigValidationError::MutuallyExclusiveFeatureSpec,
            ));
        }

        let class_table = ClassNameTable::from_config(&config);
        let processor = TaskProcessor::new(&config, class_table.clone());

        let mut adapter = DatasetAdapter::new();
        if let Some(answerer) = self.answerer {
            adapter = adapter.with_answerer(answerer);
        }
        if let Some(extractor) = self.images_extractor {
            adapter.set_extractor(TensorRole::Images, extractor);
        }
        if let Some(extractor) = self.labels_extractor {
            adapter.set_extractor(TensorRole::Labels, extractor);
        }
        if config.use_cache {
            if let Some(cache) = &self.cache {
                adapter.apply_cache(cache);
            }
        }

        // One extractor instance per feature per split: two independent
        // accumulators keep split state isolated.
        let registry = FeatureRegistry::builtin();
        let mut feature_names = Vec::new();
        let mut slots = Vec::new();
        match self.extractor_factories {
            Some(factories) => {
                for (name, factory) in factories {
                    feature_names.push(name.clone());
                    for split in Split::ALL {
                        slots.push(ExtractorSlot {
                            name: name.clone(),
                            split,
                            extractor: factory(&config, &class_table),
                            disabled: false,
                        });
                    }
                }
            }
            None => {
                let names: Vec<String> = match self.features {
                    Some(names) => names,
                    None => FeatureRegistry::default_features(config.task)
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                };
                for name in names {
                    feature_names.push(name.clone());
                    for split in Split::ALL {
                        slots.push(ExtractorSlot {
                            name: name.clone(),
                            split,
                            extractor: registry.create(&name, &config, &class_table)?,
                            disabled: false,
                        });
                    }
                }
            }
        }

        let executor = FanOutExecutor::new(config.execution, config.workers)?;

        Ok(AnalysisRunner {
            config,
            class_table,
            adapter,
            processor,
            feature_names,
            slots,
            executor,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
            state: AnalysisState::Build,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;

    #[test]
    fn test_builder_requires_config() {
        let err = AnalysisRunner::builder().build().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_feature_sources_are_mutually_exclusive() {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(2)
            .build()
            .unwrap();

        let factory: DynExtractorFactory = Arc::new(|_, table| {
            Box::new(crate::features::classification::ClassDistribution::new(
                table.clone(),
            ))
        });

        let err = AnalysisRunner::builder()
            .config(config)
            .features(vec!["class_distribution".to_string()])
            .extractor_factories(vec![("custom".to_string(), factory)])
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_build_creates_one_slot_per_feature_per_split() {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(2)
            .build()
            .unwrap();

        let runner = AnalysisRunner::builder().config(config).build().unwrap();
        let defaults = FeatureRegistry::default_features(Task::Classification);
        assert_eq!(runner.slots.len(), defaults.len() * 2);
        assert_eq!(runner.state(), AnalysisState::Build);
    }

    #[test]
    fn test_empty_train_iterable_fails_validation() {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(2)
            .build()
            .unwrap();

        let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
        let err = runner.run_train_only(Vec::new()).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
        assert_eq!(runner.state(), AnalysisState::Failed);
    }
}
