//! Analysis pipeline: orchestrator state machine, fan-out executor, and
//! progress/cancellation plumbing.

mod executor;
mod orchestrator;
pub mod progress;

pub use executor::{ExtractorSlot, FanOutExecutor};
pub use orchestrator::{
    AnalysisRunner, AnalysisRunnerBuilder, AnalysisState, DynExtractorFactory, FeatureReport,
    RunReport, RunSummary,
};
pub use progress::{
    AnalysisStage, CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate,
};
