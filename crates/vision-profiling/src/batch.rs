//! Core data model: raw user batches, access paths, and the canonical batch
//! representation consumed by all feature extractors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Dataset partition tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Val];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }

    /// The sibling split, for cross-split key alignment.
    pub fn other(&self) -> Split {
        match self {
            Split::Train => Split::Val,
            Split::Val => Split::Train,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tensor of the raw batch an extractor function produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorRole {
    Images,
    Labels,
}

impl TensorRole {
    /// Conventional position in a 2-element `(images, labels)` batch.
    pub fn conventional_index(&self) -> usize {
        match self {
            TensorRole::Images => 0,
            TensorRole::Labels => 1,
        }
    }
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRole::Images => f.write_str("images"),
            TensorRole::Labels => f.write_str("labels"),
        }
    }
}

/// An opaque, user-defined batch structure yielded by the dataset iterable.
///
/// No shape is assumed: a batch may be a bare tensor, an ordered sequence, or
/// a string-keyed mapping, nested arbitrarily. The dataset adapter resolves
/// how to pull the image and label tensors out of this tree.
#[derive(Debug, Clone)]
pub enum RawBatch {
    Tensor(ArrayD<f32>),
    Sequence(Vec<RawBatch>),
    Mapping(BTreeMap<String, RawBatch>),
}

impl RawBatch {
    /// Short structural description used in error messages and question hints.
    pub fn describe(&self) -> String {
        match self {
            RawBatch::Tensor(t) => format!("tensor {:?}", t.shape()),
            RawBatch::Sequence(items) => format!("sequence(len={})", items.len()),
            RawBatch::Mapping(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                format!("mapping{{{}}}", keys.join(", "))
            }
        }
    }

    /// Child at one access step, if present.
    pub fn child(&self, step: &AccessStep) -> Option<&RawBatch> {
        match (self, step) {
            (RawBatch::Sequence(items), AccessStep::Index(i)) => items.get(*i),
            (RawBatch::Mapping(map), AccessStep::Key(k)) => map.get(k),
            _ => None,
        }
    }

    /// Every reachable tensor leaf with its access path, in deterministic
    /// traversal order (sequence positions, then sorted mapping keys).
    pub fn tensor_leaves(&self) -> Vec<(AccessPath, Vec<usize>)> {
        let mut leaves = Vec::new();
        self.collect_leaves(&AccessPath::root(), &mut leaves);
        leaves
    }

    fn collect_leaves(&self, prefix: &AccessPath, out: &mut Vec<(AccessPath, Vec<usize>)>) {
        match self {
            RawBatch::Tensor(t) => out.push((prefix.clone(), t.shape().to_vec())),
            RawBatch::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_leaves(&prefix.child(AccessStep::Index(i)), out);
                }
            }
            RawBatch::Mapping(map) => {
                for (k, v) in map {
                    v.collect_leaves(&prefix.child(AccessStep::Key(k.clone())), out);
                }
            }
        }
    }
}

/// One navigation step into a [`RawBatch`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStep {
    Index(usize),
    Key(String),
}

/// A resolved path from the batch root down to a tensor leaf.
///
/// Displays in subscript notation (`[0]`, `["image"]`, `["sample"][1]`) so a
/// memoized resolution reads like the access expression it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPath(pub Vec<AccessStep>);

impl AccessPath {
    pub fn root() -> Self {
        AccessPath(Vec::new())
    }

    pub fn index(i: usize) -> Self {
        AccessPath(vec![AccessStep::Index(i)])
    }

    pub fn key(k: impl Into<String>) -> Self {
        AccessPath(vec![AccessStep::Key(k.into())])
    }

    pub fn child(&self, step: AccessStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        AccessPath(steps)
    }

    /// Walk the batch tree and clone out the tensor at this path.
    pub fn extract(&self, batch: &RawBatch) -> Option<ArrayD<f32>> {
        let mut node = batch;
        for step in &self.0 {
            node = node.child(step)?;
        }
        match node {
            RawBatch::Tensor(t) => Some(t.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.0 {
            match step {
                AccessStep::Index(i) => write!(f, "[{}]", i)?,
                AccessStep::Key(k) => write!(f, "[\"{}\"]", k)?,
            }
        }
        Ok(())
    }
}

/// An axis-aligned bounding box in canonical `(class_id, x1, y1, x2, y2)`
/// order, absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub class_id: i64,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// A connected component of one class plane of a segmentation mask.
///
/// Points are boundary pixels in `(x, y)` order; area is the pixel count of
/// the component; perimeter is the length of the component's outer boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub class_id: i64,
    pub points: Vec<(f64, f64)>,
    pub area: f64,
    pub perimeter: f64,
}

/// Task-shaped labels plus the structures derived from them.
///
/// Derived structures (boxes, contours) are owned by the batch, consumed
/// read-only by extractors during one fan-out cycle, and dropped with it.
#[derive(Debug, Clone)]
pub enum CanonicalLabels {
    Classification {
        class_ids: Vec<i64>,
    },
    Detection {
        /// Per-image box lists.
        boxes: Vec<Vec<BBox>>,
    },
    Segmentation {
        /// Binary per-class masks, `(N, C, H, W)`.
        masks: Array4<f32>,
        /// Per-image, per-class-plane contour lists.
        contours: Vec<Vec<Vec<Contour>>>,
    },
}

impl CanonicalLabels {
    pub fn kind(&self) -> &'static str {
        match self {
            CanonicalLabels::Classification { .. } => "classification",
            CanonicalLabels::Detection { .. } => "detection",
            CanonicalLabels::Segmentation { .. } => "segmentation",
        }
    }

    /// Number of samples carried by the labels.
    pub fn batch_size(&self) -> usize {
        match self {
            CanonicalLabels::Classification { class_ids } => class_ids.len(),
            CanonicalLabels::Detection { boxes } => boxes.len(),
            CanonicalLabels::Segmentation { masks, .. } => masks.shape()[0],
        }
    }
}

/// Normalized `(images, labels, split)` triple consumed by all extractors.
///
/// Invariant: the image batch size equals the label batch size, checked by
/// the batch processor before construction.
#[derive(Debug, Clone)]
pub struct CanonicalBatch {
    /// `(N, C, H, W)`, channel-first.
    pub images: Array4<f32>,
    pub labels: CanonicalLabels,
    pub split: Split,
}

impl CanonicalBatch {
    pub fn batch_size(&self) -> usize {
        self.images.shape()[0]
    }

    /// `(height, width)` of the images in this batch.
    pub fn image_size(&self) -> (usize, usize) {
        (self.images.shape()[2], self.images.shape()[3])
    }
}

/// Process-wide class-id → class-name lookup.
///
/// Populated once from configuration and read thereafter; threaded through
/// every extractor as an explicit `Arc`, never ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNameTable {
    names: Vec<String>,
    used: Vec<bool>,
    ignored: Vec<i64>,
}

impl ClassNameTable {
    pub fn from_config(config: &AnalysisConfig) -> Arc<Self> {
        let names = config.class_names.clone();
        let used = match &config.class_names_to_use {
            Some(subset) => names.iter().map(|n| subset.contains(n)).collect(),
            None => vec![true; names.len()],
        };
        Arc::new(ClassNameTable {
            names,
            used,
            ignored: config.ignore_labels.clone(),
        })
    }

    /// Total number of class ids, including ignored ones.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for a class id; ids outside the table fall back to `class_<id>`.
    pub fn name_of(&self, class_id: i64) -> String {
        usize::try_from(class_id)
            .ok()
            .and_then(|i| self.names.get(i))
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    pub fn is_ignored(&self, class_id: i64) -> bool {
        self.ignored.contains(&class_id)
    }

    /// Whether a class id participates in analysis (listed in
    /// `class_names_to_use` and not an ignore label).
    pub fn is_used(&self, class_id: i64) -> bool {
        if self.is_ignored(class_id) {
            return false;
        }
        usize::try_from(class_id)
            .ok()
            .and_then(|i| self.used.get(i))
            .copied()
            .unwrap_or(false)
    }

    /// Class ids participating in analysis, in id order.
    pub fn used_ids(&self) -> Vec<i64> {
        (0..self.names.len() as i64)
            .filter(|id| self.is_used(*id))
            .collect()
    }
}
