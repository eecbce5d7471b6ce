//! Progress reporting and cancellation support for the analysis run.
//!
//! Progress updates carry the orchestrator stage plus batch counts for the
//! run loop. Cancellation is checked between batches only, never inside a
//! fan-out cycle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of the analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    /// Instantiating extractors and the batch processor
    Build,
    /// Sanity-checking the data iterables
    Validate,
    /// Streaming batches through the extractors
    Run,
    /// Aggregating extractor state into features
    Aggregate,
    /// Run completed successfully
    Complete,
    /// Run was cancelled by user
    Cancelled,
    /// Run failed with an error
    Failed,
}

impl AnalysisStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Build => "Building Extractors",
            Self::Validate => "Validating Data",
            Self::Run => "Processing Batches",
            Self::Aggregate => "Aggregating Features",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Typical weight of this stage in the overall run (0.0 - 1.0).
    pub fn weight(&self) -> f32 {
        match self {
            Self::Build => 0.05,
            Self::Validate => 0.05,
            Self::Run => 0.70,
            Self::Aggregate => 0.20,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Build => 0.0,
            Self::Validate => 0.05,
            Self::Run => 0.10,
            Self::Aggregate => 0.80,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// A progress update emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current run stage
    pub stage: AnalysisStage,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    /// Batches processed so far (run stage only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batches_processed: Option<usize>,

    /// Batch bound for this run, when one is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batches_total: Option<usize>,
}

impl ProgressUpdate {
    /// Creates a new progress update for a stage.
    pub fn new(stage: AnalysisStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            batches_processed: None,
            batches_total: None,
        }
    }

    /// Creates a run-stage update with batch counts.
    pub fn with_batches(current: usize, total: Option<usize>, message: impl Into<String>) -> Self {
        let stage = AnalysisStage::Run;
        let stage_progress = match total {
            Some(total) if total > 0 => current as f32 / total as f32,
            _ => 0.0,
        };
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            batches_processed: Some(current),
            batches_total: total,
        }
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: AnalysisStage::Complete,
            progress: 1.0,
            stage_progress: 1.0,
            message: message.into(),
            batches_processed: None,
            batches_total: None,
        }
    }

    /// Creates a cancelled progress update.
    pub fn cancelled() -> Self {
        Self {
            stage: AnalysisStage::Cancelled,
            progress: 0.0,
            stage_progress: 0.0,
            message: "Analysis cancelled by user".to_string(),
            batches_processed: None,
            batches_total: None,
        }
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: AnalysisStage::Failed,
            progress: 0.0,
            stage_progress: 0.0,
            message: message.into(),
            batches_processed: None,
            batches_total: None,
        }
    }
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be `Send + Sync` and should be efficient and
/// non-blocking: updates are emitted once per batch.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running analysis.
///
/// Safe to clone and share across threads; call [`cancel()`](Self::cancel)
/// from any thread. The orchestrator checks the token between batches and
/// returns [`AnalysisError::Cancelled`](crate::error::AnalysisError::Cancelled)
/// when it has been set.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Reset the token for reuse.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());

        token2.reset();
        assert!(!token1.is_cancelled());
    }

    #[test]
    fn test_progress_update_with_batches() {
        let update = ProgressUpdate::with_batches(5, Some(10), "Batch 5/10");
        assert_eq!(update.stage, AnalysisStage::Run);
        assert_eq!(update.stage_progress, 0.5);
        assert_eq!(update.batches_processed, Some(5));
        assert_eq!(update.batches_total, Some(10));
    }

    #[test]
    fn test_progress_update_unbounded_run() {
        let update = ProgressUpdate::with_batches(42, None, "Batch 42");
        assert_eq!(update.stage_progress, 0.0);
        assert_eq!(update.batches_total, None);
    }

    #[test]
    fn test_stage_weights_sum() {
        let stages = [
            AnalysisStage::Build,
            AnalysisStage::Validate,
            AnalysisStage::Run,
            AnalysisStage::Aggregate,
        ];
        let total_weight: f32 = stages.iter().map(|s| s.weight()).sum();
        assert!((total_weight - 1.0).abs() < 0.01, "weights should sum to ~1.0");
    }

    #[test]
    fn test_stage_json_values() {
        let json = serde_json::to_string(&AnalysisStage::Aggregate).unwrap();
        assert_eq!(json, "\"aggregate\"");
        let json = serde_json::to_string(&AnalysisStage::Run).unwrap();
        assert_eq!(json, "\"run\"");
    }

    #[test]
    fn test_closure_reporter_across_threads() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let reporter = Arc::new(ClosureProgressReporter::new(move |_update| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let reporter_clone = reporter.clone();
        let handle = std::thread::spawn(move || {
            reporter_clone.report(ProgressUpdate::complete("done"));
        });
        handle.join().expect("thread should not panic");

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
