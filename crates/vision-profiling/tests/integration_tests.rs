//! Integration tests for the analysis pipeline.
//!
//! These tests drive the orchestrator end-to-end over synthetic datasets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayD;
use polars::prelude::*;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use serde_json::json;

use vision_profiling::{
    AnalysisConfig, AnalysisError, AnalysisRunner, AnalysisState, BarPlotOptions, BboxFormat,
    CancellationToken, CanonicalBatch, ClosureAnswerer, ConfigValidationError, DynExtractorFactory,
    ExecutionMode, Feature, FeatureExtractor, PlotOptions, Question, RawBatch, RunReport, Split,
    Task,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Synthetic datasets
// ============================================================================

fn pair(images: ArrayD<f32>, labels: ArrayD<f32>) -> RawBatch {
    RawBatch::Sequence(vec![RawBatch::Tensor(images), RawBatch::Tensor(labels)])
}

/// Deterministic classification batches: class id cycles over `n_classes`.
fn classification_batches(n_batches: usize, batch_size: usize, n_classes: usize) -> Vec<RawBatch> {
    (0..n_batches)
        .map(|b| {
            let images = ArrayD::from_shape_vec(
                vec![batch_size, 3, 8, 8],
                (0..batch_size * 3 * 8 * 8)
                    .map(|i| ((b + i) % 7) as f32 / 7.0)
                    .collect(),
            )
            .unwrap();
            let labels = ArrayD::from_shape_vec(
                vec![batch_size],
                (0..batch_size)
                    .map(|i| ((b + i) % n_classes) as f32)
                    .collect(),
            )
            .unwrap();
            pair(images, labels)
        })
        .collect()
}

/// Deterministic segmentation batches with integer-coded masks.
fn segmentation_batches(n_batches: usize, batch_size: usize, n_classes: usize) -> Vec<RawBatch> {
    (0..n_batches)
        .map(|b| {
            let images = ArrayD::from_elem(vec![batch_size, 3, 8, 8], 0.5);
            let mut masks = ArrayD::zeros(vec![batch_size, 8, 8]);
            for i in 0..batch_size {
                let class = 1 + (b + i) % (n_classes - 1);
                for r in 2..5 {
                    for c in 2..5 {
                        masks[[i, r, c]] = class as f32;
                    }
                }
            }
            pair(images, masks)
        })
        .collect()
}

/// Deterministic detection batches, `(class_id, x1, y1, x2, y2)` rows.
fn detection_batches(n_batches: usize, batch_size: usize) -> Vec<RawBatch> {
    (0..n_batches)
        .map(|b| {
            let images = ArrayD::from_elem(vec![batch_size, 3, 32, 32], 0.25);
            let mut labels = ArrayD::zeros(vec![batch_size, 2, 5]);
            for i in 0..batch_size {
                let class = ((b + i) % 3) as f32;
                labels[[i, 0, 0]] = class;
                labels[[i, 0, 1]] = 4.0;
                labels[[i, 0, 2]] = 4.0;
                labels[[i, 0, 3]] = 12.0;
                labels[[i, 0, 4]] = 20.0;
                // second row stays zero padding
            }
            pair(images, labels)
        })
        .collect()
}

fn segmentation_config(execution: ExecutionMode) -> AnalysisConfig {
    AnalysisConfig::builder()
        .task(Task::Segmentation)
        .class_names(vec![
            "background".to_string(),
            "car".to_string(),
            "person".to_string(),
        ])
        .ignore_labels(vec![0])
        .execution(execution)
        .build()
        .unwrap()
}

fn feature_jsons(report: &RunReport) -> BTreeMap<String, serde_json::Value> {
    report
        .features
        .iter()
        .filter_map(|f| {
            f.train
                .as_ref()
                .map(|feature| (f.name.clone(), feature.json.clone()))
        })
        .collect()
}

// ============================================================================
// End-to-end runs
// ============================================================================

#[test]
fn test_full_segmentation_run() {
    init_tracing();
    let mut runner = AnalysisRunner::builder()
        .config(segmentation_config(ExecutionMode::Sequential))
        .build()
        .unwrap();

    let report = runner
        .run(
            segmentation_batches(6, 2, 3),
            Some(segmentation_batches(4, 2, 3)),
        )
        .unwrap();

    assert_eq!(runner.state(), AnalysisState::Done);
    assert_eq!(report.features.len(), 7);
    assert_eq!(report.summary.train_batches, 6);
    assert_eq!(report.summary.val_batches, 4);
    assert_eq!(report.summary.skipped_batches, 0);
    assert!(report.summary.disabled_extractors.is_empty());

    for feature in &report.features {
        let train = feature.train.as_ref().expect("train feature present");
        assert!(!train.empty, "{} should have seen data", feature.name);
        assert!(feature.val.is_some(), "{} should have a val feature", feature.name);
    }

    // Every mask component has class 1 or 2, never the ignored background.
    let jsons = feature_jsons(&report);
    let class_dist = &jsons["segmentation_class_distribution"];
    let total: f64 = class_dist
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["count"].as_f64().unwrap())
        .sum();
    assert_eq!(total, 12.0); // 6 batches x 2 images x 1 component
}

#[test]
fn test_detection_run_end_to_end() {
    let config = AnalysisConfig::builder()
        .task(Task::Detection)
        .n_classes(3)
        .bbox_format(BboxFormat::Xyxy)
        .is_label_first(true)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
    let report = runner.run_train_only(detection_batches(5, 2)).unwrap();

    assert_eq!(report.features.len(), 5);
    let jsons = feature_jsons(&report);
    let total: f64 = jsons["detection_class_distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["count"].as_f64().unwrap())
        .sum();
    assert_eq!(total, 10.0); // one real box per image, padding dropped
}

#[test]
fn test_parallel_and_sequential_aggregates_identical() {
    init_tracing();
    let run = |execution: ExecutionMode| {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(4)
            .execution(execution)
            .workers(4)
            .build()
            .unwrap();
        let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
        let report = runner
            .run(
                classification_batches(12, 3, 4),
                Some(classification_batches(5, 3, 4)),
            )
            .unwrap();
        feature_jsons(&report)
    };

    let parallel = run(ExecutionMode::Parallel);
    let sequential = run(ExecutionMode::Sequential);
    assert_eq!(parallel, sequential);
}

#[test]
fn test_update_order_invariance_within_split() {
    let run = |batches: Vec<RawBatch>| {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(4)
            .execution(ExecutionMode::Sequential)
            .build()
            .unwrap();
        let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
        feature_jsons(&runner.run_train_only(batches).unwrap())
    };

    let mut batches = classification_batches(8, 2, 4);
    let ordered = run(batches.clone());

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    batches.shuffle(&mut rng);
    let shuffled = run(batches);

    assert_eq!(ordered, shuffled);
}

// ============================================================================
// Run-loop termination
// ============================================================================

#[test]
fn test_val_exhaustion_mid_run_continues_train_only() {
    let mut runner = AnalysisRunner::builder()
        .config(segmentation_config(ExecutionMode::Sequential))
        .build()
        .unwrap();

    let report = runner
        .run(
            segmentation_batches(10, 1, 3),
            Some(segmentation_batches(3, 1, 3)),
        )
        .unwrap();

    assert_eq!(runner.state(), AnalysisState::Done);
    assert_eq!(report.summary.train_batches, 10);
    assert_eq!(report.summary.val_batches, 3);

    // Val features aggregate over the partial state.
    let appearances = report
        .features
        .iter()
        .find(|f| f.name == "appearances_in_images")
        .unwrap();
    assert!(!appearances.val.as_ref().unwrap().empty);
}

#[test]
fn test_empty_val_iterable_degrades_to_train_only() {
    let mut runner = AnalysisRunner::builder()
        .config(segmentation_config(ExecutionMode::Sequential))
        .build()
        .unwrap();

    let report = runner
        .run(segmentation_batches(4, 1, 3), Some(Vec::new()))
        .unwrap();

    assert_eq!(report.summary.train_batches, 4);
    assert_eq!(report.summary.val_batches, 0);
    assert!(!report.summary.warnings.is_empty());
}

#[test]
fn test_early_stop_bounds_batches() {
    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .batches_early_stop(5)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
    let report = runner
        .run_train_only(classification_batches(100, 2, 4))
        .unwrap();
    assert_eq!(report.summary.train_batches, 5);
}

#[test]
fn test_cancellation_between_batches() {
    let token = CancellationToken::new();
    token.cancel();

    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder()
        .config(config)
        .cancellation_token(token)
        .build()
        .unwrap();

    let err = runner
        .run_train_only(classification_batches(10, 2, 4))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(runner.state(), AnalysisState::Failed);
}

// ============================================================================
// Heuristic resolution
// ============================================================================

#[test]
fn test_heuristic_resolution_happens_once() {
    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
    let report = runner
        .run(
            classification_batches(200, 2, 4),
            Some(classification_batches(150, 2, 4)),
        )
        .unwrap();

    // One resolution per tensor role, shared across splits and batches.
    assert_eq!(report.summary.resolutions_performed, 2);
}

#[test]
fn test_keyed_mapping_dataset_resolves_automatically() {
    let batches: Vec<RawBatch> = classification_batches(3, 2, 4)
        .into_iter()
        .map(|batch| {
            let RawBatch::Sequence(mut items) = batch else {
                unreachable!()
            };
            let mut map = BTreeMap::new();
            map.insert("label".to_string(), items.pop().unwrap());
            map.insert("image".to_string(), items.pop().unwrap());
            RawBatch::Mapping(map)
        })
        .collect();

    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
    let report = runner.run_train_only(batches).unwrap();
    assert_eq!(report.summary.train_batches, 3);
}

#[test]
fn test_interactive_resolution_via_answerer() {
    // Batches of three unnamed tensors: heuristics cannot decide.
    let batches: Vec<RawBatch> = (0..20)
        .map(|_| {
            RawBatch::Sequence(vec![
                RawBatch::Tensor(ArrayD::zeros(vec![2, 3, 8, 8])),
                RawBatch::Tensor(ArrayD::zeros(vec![2, 8, 8])),
                RawBatch::Tensor(ArrayD::zeros(vec![2])),
            ])
        })
        .collect();

    let questions_asked = Arc::new(AtomicUsize::new(0));
    let counter = questions_asked.clone();
    let answerer = ClosureAnswerer::new(move |q: &Question| {
        counter.fetch_add(1, Ordering::SeqCst);
        if q.prompt.contains("images") { 0 } else { 2 }
    });

    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder()
        .config(config)
        .answerer(Arc::new(answerer))
        .build()
        .unwrap();

    let report = runner.run_train_only(batches).unwrap();
    assert_eq!(report.summary.train_batches, 20);
    // Blocked exactly once per role, despite 20 batches.
    assert_eq!(questions_asked.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_document_skips_resolution_on_rerun() {
    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut first = AnalysisRunner::builder()
        .config(config.clone())
        .build()
        .unwrap();
    first.run_train_only(classification_batches(3, 2, 4)).unwrap();
    let cache = first.cache_document();

    let cached_config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .use_cache(true)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();
    let mut second = AnalysisRunner::builder()
        .config(cached_config)
        .cache_document(cache)
        .build()
        .unwrap();
    let report = second
        .run_train_only(classification_batches(3, 2, 4))
        .unwrap();
    assert_eq!(report.summary.resolutions_performed, 0);
}

// ============================================================================
// Configuration conflicts
// ============================================================================

#[test]
fn test_conflicting_class_spec_fails_before_data() {
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

// ============================================================================
// Failure containment
// ============================================================================

/// Counts updates; fails once at a configured update index.
struct FlakyCounter {
    fail_at: Option<usize>,
    updates: usize,
    batches_counted: usize,
}

impl FeatureExtractor for FlakyCounter {
    fn name(&self) -> &'static str {
        "flaky_counter"
    }

    fn update(&mut self, _batch: &CanonicalBatch) -> vision_profiling::Result<()> {
        self.updates += 1;
        if self.fail_at == Some(self.updates) {
            return Err(AnalysisError::ExtractorRuntime {
                name: "flaky_counter".to_string(),
                message: "synthetic failure".to_string(),
            });
        }
        self.batches_counted += 1;
        Ok(())
    }

    fn aggregate(&self, _split: Split) -> vision_profiling::Result<Feature> {
        let count = self.batches_counted as f64;
        Ok(Feature {
            title: "Batches counted".to_string(),
            description: "Number of batches folded into this accumulator.".to_string(),
            data: df!("bin" => vec!["batches".to_string()], "value" => vec![count])?,
            plot_options: PlotOptions::Bar(BarPlotOptions {
                x_label_key: "bin".to_string(),
                x_label_name: "Counter".to_string(),
                y_label_key: "value".to_string(),
                y_label_name: "# Batches".to_string(),
                width: 0.8,
                x_ticks_rotation: None,
                log_scale: false,
            }),
            json: json!({ "batches": count }),
            empty: self.batches_counted == 0,
        })
    }
}

#[test]
fn test_failing_extractor_is_soft_disabled_not_fatal() {
    let flaky: DynExtractorFactory = Arc::new(|_, _| {
        Box::new(FlakyCounter {
            fail_at: Some(3),
            updates: 0,
            batches_counted: 0,
        })
    });
    let healthy: DynExtractorFactory = Arc::new(|_, _| {
        Box::new(FlakyCounter {
            fail_at: None,
            updates: 0,
            batches_counted: 0,
        })
    });

    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder()
        .config(config)
        .extractor_factories(vec![
            ("flaky".to_string(), flaky),
            ("healthy".to_string(), healthy),
        ])
        .build()
        .unwrap();

    let report = runner
        .run_train_only(classification_batches(10, 2, 4))
        .unwrap();

    // The run survived all 10 batches.
    assert_eq!(runner.state(), AnalysisState::Done);
    assert_eq!(report.summary.train_batches, 10);
    assert_eq!(report.summary.disabled_extractors, vec!["flaky (train)"]);

    // The flaky extractor still aggregates its partial (non-empty) state.
    let flaky_feature = report.features[0].train.as_ref().unwrap();
    assert!(!flaky_feature.empty);
    assert_eq!(flaky_feature.json["batches"], json!(2.0));

    // The healthy extractor saw every batch.
    let healthy_feature = report.features[1].train.as_ref().unwrap();
    assert_eq!(healthy_feature.json["batches"], json!(10.0));
}

#[test]
fn test_shape_failure_skips_batch_not_run() {
    let mut batches = classification_batches(4, 2, 4);
    // Batch with mismatched label count: skipped with a warning.
    batches.insert(
        2,
        pair(
            ArrayD::zeros(vec![2, 3, 8, 8]),
            ArrayD::from_shape_vec(vec![3], vec![0.0, 1.0, 2.0]).unwrap(),
        ),
    );

    let config = AnalysisConfig::builder()
        .task(Task::Classification)
        .n_classes(4)
        .execution(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let mut runner = AnalysisRunner::builder().config(config).build().unwrap();
    let report = runner.run_train_only(batches).unwrap();

    assert_eq!(report.summary.train_batches, 4);
    assert_eq!(report.summary.skipped_batches, 1);
    assert_eq!(runner.state(), AnalysisState::Done);
}
