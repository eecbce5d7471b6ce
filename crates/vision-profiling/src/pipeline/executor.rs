//! Fan-out execution of extractor updates for one canonical batch.
//!
//! Extractors never share mutable state, so all updates for a batch run
//! concurrently on a bounded worker pool. The orchestrator joins the fan-out
//! before pulling the next batch: batch ordering stays strictly sequential,
//! ordering across extractors within a batch is unordered and must not be
//! observable in aggregates. Sequential mode runs extractors on the calling
//! thread in registration order and must produce identical aggregates.

use rayon::prelude::*;

use crate::batch::{CanonicalBatch, Split};
use crate::config::ExecutionMode;
use crate::error::{AnalysisError, Result};
use crate::features::FeatureExtractor;

/// One registered extractor instance, bound to a split.
pub struct ExtractorSlot {
    pub name: String,
    pub split: Split,
    pub extractor: Box<dyn FeatureExtractor>,
    /// Set when an update failed; the extractor receives no further updates
    /// but still attempts to aggregate.
    pub disabled: bool,
}

pub struct FanOutExecutor {
    pool: Option<rayon::ThreadPool>,
}

impl FanOutExecutor {
    pub fn new(mode: ExecutionMode, workers: Option<usize>) -> Result<Self> {
        let pool = match mode {
            ExecutionMode::Sequential => None,
            ExecutionMode::Parallel => {
                let mut builder = rayon::ThreadPoolBuilder::new();
                if let Some(workers) = workers {
                    builder = builder.num_threads(workers);
                }
                Some(builder.build().map_err(|e| {
                    AnalysisError::Validation(format!("failed to build worker pool: {e}"))
                })?)
            }
        };
        Ok(FanOutExecutor { pool })
    }

    /// Run `update` on every enabled slot of the batch's split, returning
    /// per-slot failures. The call blocks until all updates complete.
    pub fn dispatch(
        &self,
        slots: &mut [ExtractorSlot],
        batch: &CanonicalBatch,
    ) -> Vec<(usize, AnalysisError)> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                slots
                    .par_iter_mut()
                    .enumerate()
                    .filter(|(_, slot)| !slot.disabled && slot.split == batch.split)
                    .filter_map(|(index, slot)| {
                        slot.extractor.update(batch).err().map(|e| (index, e))
                    })
                    .collect()
            }),
            None => slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| !slot.disabled && slot.split == batch.split)
                .filter_map(|(index, slot)| slot.extractor.update(batch).err().map(|e| (index, e)))
                .collect(),
        }
    }
}
