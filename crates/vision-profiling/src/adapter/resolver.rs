//! Heuristic resolution of image/label extraction functions.
//!
//! The adapter maps arbitrary user batch structures to an `(images, labels)`
//! tensor pair. Resolution for each role runs at most once per run: the
//! outcome is memoized in a write-once slot and reused for every subsequent
//! batch of both splits, unless explicitly cleared.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::detectors::{ShapeDetector, builtin_detectors};
use crate::adapter::question::{Answerer, Question, QuestionOption};
use crate::batch::{AccessPath, RawBatch, TensorRole};
use crate::error::{AnalysisError, Result};

/// A resolved extraction function: either a memoized access path into the
/// batch tree, or a user-supplied function bypassing heuristics entirely.
#[derive(Clone)]
pub enum TensorExtractor {
    Path(AccessPath),
    Custom(Arc<dyn Fn(&RawBatch) -> Result<ArrayD<f32>> + Send + Sync>),
}

impl TensorExtractor {
    pub fn apply(&self, batch: &RawBatch, role: TensorRole) -> Result<ArrayD<f32>> {
        match self {
            TensorExtractor::Path(path) => {
                path.extract(batch).ok_or_else(|| AnalysisError::Extraction {
                    role,
                    observed: format!("{} (no tensor at {})", batch.describe(), path),
                })
            }
            TensorExtractor::Custom(f) => f(batch),
        }
    }
}

impl fmt::Debug for TensorExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorExtractor::Path(path) => write!(f, "TensorExtractor::Path({})", path),
            TensorExtractor::Custom(_) => f.write_str("TensorExtractor::Custom(..)"),
        }
    }
}

/// Serializable snapshot of resolved access paths.
///
/// The core performs no file I/O; an external collaborator persists and
/// restores this document when answer caching is enabled, so re-runs skip
/// the interactive step entirely. Custom extractor functions are not
/// representable and are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub images: Option<AccessPath>,
    pub labels: Option<AccessPath>,
}

/// Converts raw batches into `(images, labels)` tensor pairs.
pub struct DatasetAdapter {
    images: RwLock<Option<TensorExtractor>>,
    labels: RwLock<Option<TensorExtractor>>,
    detectors: Vec<Box<dyn ShapeDetector>>,
    answerer: Option<Arc<dyn Answerer>>,
    resolutions: AtomicUsize,
}

impl Default for DatasetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetAdapter {
    pub fn new() -> Self {
        DatasetAdapter {
            images: RwLock::new(None),
            labels: RwLock::new(None),
            detectors: builtin_detectors(),
            answerer: None,
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Attach the interactive collaborator consulted when heuristics fail.
    pub fn with_answerer(mut self, answerer: Arc<dyn Answerer>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    /// Pre-seed a slot with an explicit extractor, bypassing heuristics.
    pub fn set_extractor(&self, role: TensorRole, extractor: TensorExtractor) {
        *self.slot(role).write() = Some(extractor);
    }

    /// Restore previously resolved paths from a cache snapshot.
    pub fn apply_cache(&self, doc: &CacheDocument) {
        if let Some(path) = &doc.images {
            *self.images.write() = Some(TensorExtractor::Path(path.clone()));
        }
        if let Some(path) = &doc.labels {
            *self.labels.write() = Some(TensorExtractor::Path(path.clone()));
        }
    }

    /// Snapshot the resolved paths for external persistence.
    pub fn cache_document(&self) -> CacheDocument {
        let path_of = |slot: &RwLock<Option<TensorExtractor>>| match &*slot.read() {
            Some(TensorExtractor::Path(path)) => Some(path.clone()),
            _ => None,
        };
        CacheDocument {
            images: path_of(&self.images),
            labels: path_of(&self.labels),
        }
    }

    /// Explicitly clear both slots, re-enabling resolution.
    pub fn clear(&self) {
        *self.images.write() = None;
        *self.labels.write() = None;
    }

    /// Number of heuristic resolutions performed so far (at most one per
    /// role per run).
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Extract the `(images, labels)` pair from a raw batch, resolving the
    /// extraction functions on first contact only.
    pub fn adapt(&self, batch: &RawBatch) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let images = self
            .extractor_for(TensorRole::Images, batch)?
            .apply(batch, TensorRole::Images)?;
        let labels = self
            .extractor_for(TensorRole::Labels, batch)?
            .apply(batch, TensorRole::Labels)?;
        Ok((images, labels))
    }

    fn slot(&self, role: TensorRole) -> &RwLock<Option<TensorExtractor>> {
        match role {
            TensorRole::Images => &self.images,
            TensorRole::Labels => &self.labels,
        }
    }

    fn extractor_for(&self, role: TensorRole, batch: &RawBatch) -> Result<TensorExtractor> {
        if let Some(existing) = &*self.slot(role).read() {
            return Ok(existing.clone());
        }
        let resolved = self.resolve(role, batch)?;
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        *self.slot(role).write() = Some(resolved.clone());
        Ok(resolved)
    }

    /// The heuristic cascade, applied independently per role. Each step
    /// short-circuits at first success.
    fn resolve(&self, role: TensorRole, batch: &RawBatch) -> Result<TensorExtractor> {
        // A tuple of 2 is taken to represent (images, labels) in this order.
        if let RawBatch::Sequence(items) = batch {
            if items.len() == 2 {
                let index = role.conventional_index();
                if matches!(items[index], RawBatch::Tensor(_)) {
                    let path = AccessPath::index(index);
                    info!("resolved {} extractor positionally: {}", role, path);
                    return Ok(TensorExtractor::Path(path));
                }
            }
        }

        let matches: Vec<(&'static str, AccessPath)> = self
            .detectors
            .iter()
            .filter_map(|d| {
                d.detect(batch).map(|(images, labels)| {
                    let path = match role {
                        TensorRole::Images => images,
                        TensorRole::Labels => labels,
                    };
                    (d.name(), path)
                })
            })
            .collect();
        if let [(name, path)] = matches.as_slice() {
            info!("resolved {} extractor via '{}' detector: {}", role, name, path);
            return Ok(TensorExtractor::Path(path.clone()));
        }
        debug!(
            "{} shape detectors matched for {}; falling through",
            matches.len(),
            role
        );

        if matches!(batch, RawBatch::Sequence(_) | RawBatch::Mapping(_)) {
            let leaves = batch.tensor_leaves();
            if !leaves.is_empty() {
                return self.ask(role, batch, leaves);
            }
        }

        Err(AnalysisError::Extraction {
            role,
            observed: batch.describe(),
        })
    }

    fn ask(
        &self,
        role: TensorRole,
        batch: &RawBatch,
        leaves: Vec<(AccessPath, Vec<usize>)>,
    ) -> Result<TensorExtractor> {
        let Some(answerer) = &self.answerer else {
            return Err(AnalysisError::Extraction {
                role,
                observed: format!("{} (no interactive answerer configured)", batch.describe()),
            });
        };

        let question = Question {
            prompt: format!("Which tensor represents your {}?", role),
            options: leaves
                .iter()
                .map(|(path, shape)| QuestionOption {
                    label: path.to_string(),
                    hint: format!("tensor {:?}", shape),
                })
                .collect(),
        };
        let choice = answerer.ask(&question)?;
        let (path, _) = leaves
            .into_iter()
            .nth(choice)
            .ok_or_else(|| AnalysisError::Interaction(format!("answer {choice} out of range")))?;
        info!("resolved {} extractor interactively: {}", role, path);
        Ok(TensorExtractor::Path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::question::ClosureAnswerer;
    use ndarray::ArrayD;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize as TestCounter;

    fn tensor(shape: &[usize]) -> RawBatch {
        RawBatch::Tensor(ArrayD::zeros(shape.to_vec()))
    }

    fn pair_batch() -> RawBatch {
        RawBatch::Sequence(vec![tensor(&[2, 3, 8, 8]), tensor(&[2])])
    }

    #[test]
    fn test_positional_resolution() {
        let adapter = DatasetAdapter::new();
        let (images, labels) = adapter.adapt(&pair_batch()).unwrap();
        assert_eq!(images.shape(), &[2, 3, 8, 8]);
        assert_eq!(labels.shape(), &[2]);
        assert_eq!(adapter.resolution_count(), 2);
    }

    #[test]
    fn test_resolution_is_memoized_across_batches() {
        let adapter = DatasetAdapter::new();
        for _ in 0..200 {
            adapter.adapt(&pair_batch()).unwrap();
        }
        assert_eq!(adapter.resolution_count(), 2);
    }

    #[test]
    fn test_keyed_mapping_resolution() {
        let mut map = BTreeMap::new();
        map.insert("image".to_string(), tensor(&[4, 3, 8, 8]));
        map.insert("mask".to_string(), tensor(&[4, 1, 8, 8]));
        let batch = RawBatch::Mapping(map);

        let adapter = DatasetAdapter::new();
        let (images, labels) = adapter.adapt(&batch).unwrap();
        assert_eq!(images.shape(), &[4, 3, 8, 8]);
        assert_eq!(labels.shape(), &[4, 1, 8, 8]);
    }

    #[test]
    fn test_interactive_resolution_asks_once() {
        // Three unnamed tensors: heuristics cannot decide, the answerer can.
        let batch = RawBatch::Sequence(vec![
            tensor(&[2, 3, 8, 8]),
            tensor(&[2, 1, 8, 8]),
            tensor(&[2]),
        ]);

        let asked = Arc::new(TestCounter::new(0));
        let asked_in_answerer = asked.clone();
        let answerer = ClosureAnswerer::new(move |q: &Question| {
            asked_in_answerer.fetch_add(1, Ordering::SeqCst);
            // Pick the 4-d tensor for images, the trailing tensor for labels.
            if q.prompt.contains("images") { 0 } else { 2 }
        });

        let adapter = DatasetAdapter::new().with_answerer(Arc::new(answerer));
        for _ in 0..50 {
            let (images, labels) = adapter.adapt(&batch).unwrap();
            assert_eq!(images.shape(), &[2, 3, 8, 8]);
            assert_eq!(labels.shape(), &[2]);
        }
        assert_eq!(asked.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unresolvable_batch_names_role_and_type() {
        let adapter = DatasetAdapter::new();
        let batch = RawBatch::Sequence(vec![RawBatch::Sequence(vec![]), tensor(&[2])]);
        // No tensor at [0], no detector match, no leaves for images... the
        // labels slot would resolve, but images fail first.
        let err = adapter.adapt(&batch).unwrap_err();
        match err {
            AnalysisError::Extraction { role, .. } => assert_eq!(role, TensorRole::Images),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bare_tensor_root_is_rejected() {
        let adapter = DatasetAdapter::new();
        let err = adapter.adapt(&tensor(&[2, 3, 8, 8])).unwrap_err();
        assert_eq!(err.error_code(), "EXTRACTION_FAILED");
    }

    #[test]
    fn test_explicit_extractor_bypasses_heuristics() {
        let adapter = DatasetAdapter::new();
        adapter.set_extractor(
            TensorRole::Images,
            TensorExtractor::Custom(Arc::new(|b: &RawBatch| {
                AccessPath::index(1).extract(b).ok_or_else(|| {
                    AnalysisError::Extraction {
                        role: TensorRole::Images,
                        observed: b.describe(),
                    }
                })
            })),
        );
        adapter.set_extractor(TensorRole::Labels, TensorExtractor::Path(AccessPath::index(0)));

        // Reversed batch order: the explicit extractors still find the right
        // tensors and no heuristic resolution happens.
        let batch = RawBatch::Sequence(vec![tensor(&[2]), tensor(&[2, 3, 8, 8])]);
        let (images, labels) = adapter.adapt(&batch).unwrap();
        assert_eq!(images.shape(), &[2, 3, 8, 8]);
        assert_eq!(labels.shape(), &[2]);
        assert_eq!(adapter.resolution_count(), 0);
    }

    #[test]
    fn test_cache_document_roundtrip() {
        let adapter = DatasetAdapter::new();
        adapter.adapt(&pair_batch()).unwrap();

        let doc = adapter.cache_document();
        assert_eq!(doc.images, Some(AccessPath::index(0)));

        let restored = DatasetAdapter::new();
        restored.apply_cache(&doc);
        restored.adapt(&pair_batch()).unwrap();
        assert_eq!(restored.resolution_count(), 0);
    }

    #[test]
    fn test_clear_re_enables_resolution() {
        let adapter = DatasetAdapter::new();
        adapter.adapt(&pair_batch()).unwrap();
        assert_eq!(adapter.resolution_count(), 2);

        adapter.clear();
        adapter.adapt(&pair_batch()).unwrap();
        assert_eq!(adapter.resolution_count(), 4);
    }
}
