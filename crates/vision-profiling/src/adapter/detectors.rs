//! Registered dataset-shape detectors.
//!
//! A detector pattern-matches one common container layout and proposes the
//! image/label access paths for it. The resolver consults all registered
//! detectors and adopts a proposal only when exactly one detector matches;
//! conflicting matches fall through to the interactive question.

use crate::batch::{AccessPath, AccessStep, RawBatch};

/// Vocabulary of mapping keys conventionally holding images.
const IMAGE_KEYS: &[&str] = &["image", "images", "img", "data", "input", "inputs"];

/// Vocabulary of mapping keys conventionally holding labels.
const LABEL_KEYS: &[&str] = &[
    "label",
    "labels",
    "mask",
    "masks",
    "target",
    "targets",
    "bboxes",
    "boxes",
    "annotations",
    "gt",
];

/// A pattern-matcher over one known container shape.
pub trait ShapeDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Proposed `(images, labels)` paths when this batch matches the shape.
    fn detect(&self, batch: &RawBatch) -> Option<(AccessPath, AccessPath)>;
}

/// Matches a mapping carrying exactly one tensor under an image key and one
/// under a label key, e.g. `{"image": ..., "mask": ...}`.
pub struct KeyedMappingDetector;

impl ShapeDetector for KeyedMappingDetector {
    fn name(&self) -> &'static str {
        "keyed_mapping"
    }

    fn detect(&self, batch: &RawBatch) -> Option<(AccessPath, AccessPath)> {
        let RawBatch::Mapping(map) = batch else {
            return None;
        };

        let image_hits: Vec<&String> = map
            .iter()
            .filter(|(k, v)| {
                IMAGE_KEYS.contains(&k.to_lowercase().as_str())
                    && matches!(v, RawBatch::Tensor(_))
            })
            .map(|(k, _)| k)
            .collect();
        let label_hits: Vec<&String> = map
            .iter()
            .filter(|(k, v)| {
                LABEL_KEYS.contains(&k.to_lowercase().as_str())
                    && matches!(v, RawBatch::Tensor(_))
            })
            .map(|(k, _)| k)
            .collect();

        match (image_hits.as_slice(), label_hits.as_slice()) {
            ([image_key], [label_key]) => Some((
                AccessPath::key((*image_key).clone()),
                AccessPath::key((*label_key).clone()),
            )),
            _ => None,
        }
    }
}

/// Matches a mapping whose single entry wraps a 2-element `(images, labels)`
/// sequence of tensors, e.g. `{"sample": (images, labels)}`.
pub struct WrappedPairDetector;

impl ShapeDetector for WrappedPairDetector {
    fn name(&self) -> &'static str {
        "wrapped_pair"
    }

    fn detect(&self, batch: &RawBatch) -> Option<(AccessPath, AccessPath)> {
        let RawBatch::Mapping(map) = batch else {
            return None;
        };
        if map.len() != 1 {
            return None;
        }
        let (key, value) = map.iter().next()?;
        let RawBatch::Sequence(items) = value else {
            return None;
        };
        if items.len() == 2
            && items.iter().all(|item| matches!(item, RawBatch::Tensor(_)))
        {
            let base = AccessPath::key(key.clone());
            return Some((
                base.child(AccessStep::Index(0)),
                base.child(AccessStep::Index(1)),
            ));
        }
        None
    }
}

/// The built-in detector set consulted by the resolver.
pub fn builtin_detectors() -> Vec<Box<dyn ShapeDetector>> {
    vec![Box::new(KeyedMappingDetector), Box::new(WrappedPairDetector)]
}
