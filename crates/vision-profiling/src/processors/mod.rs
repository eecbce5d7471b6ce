//! Task-specific batch processors.
//!
//! A closed set of tagged variants selected at construction time: each task
//! kind owns the transform from raw `(images, labels)` tensors into a
//! [`CanonicalBatch`](crate::batch::CanonicalBatch).

pub mod classification;
pub mod contours;
pub mod detection;
pub mod images;
pub mod segmentation;

use std::sync::Arc;

use ndarray::ArrayD;

use crate::batch::{CanonicalBatch, ClassNameTable, Split};
use crate::config::{AnalysisConfig, Task};
use crate::error::Result;

pub use classification::ClassificationProcessor;
pub use detection::DetectionProcessor;
pub use images::{ChannelOrder, ImageNormalizer};
pub use segmentation::SegmentationProcessor;

/// Task-selected batch processor.
pub enum TaskProcessor {
    Classification(ClassificationProcessor),
    Detection(DetectionProcessor),
    Segmentation(SegmentationProcessor),
}

impl TaskProcessor {
    pub fn new(config: &AnalysisConfig, table: Arc<ClassNameTable>) -> Self {
        match config.task {
            Task::Classification => {
                TaskProcessor::Classification(ClassificationProcessor::new(config, table))
            }
            Task::Detection => TaskProcessor::Detection(DetectionProcessor::new(config, table)),
            Task::Segmentation => {
                TaskProcessor::Segmentation(SegmentationProcessor::new(config, table))
            }
        }
    }

    /// Transform extracted tensors into a canonical batch.
    ///
    /// A [`Shape`](crate::error::AnalysisError::Shape) error is fatal for the
    /// batch (skipped with a warning by the orchestrator), not for the run.
    pub fn process(
        &self,
        images: ArrayD<f32>,
        labels: ArrayD<f32>,
        split: Split,
    ) -> Result<CanonicalBatch> {
        match self {
            TaskProcessor::Classification(p) => p.process(images, labels, split),
            TaskProcessor::Detection(p) => p.process(images, labels, split),
            TaskProcessor::Segmentation(p) => p.process(images, labels, split),
        }
    }
}
