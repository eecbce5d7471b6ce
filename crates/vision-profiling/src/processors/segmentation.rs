//! Segmentation batch processor: soft-mask thresholding, one-hot expansion
//! of integer-coded masks, and per-class contour extraction.

use std::sync::Arc;

use ndarray::{Array4, ArrayD, Axis, Ix4};

use crate::batch::{CanonicalBatch, CanonicalLabels, ClassNameTable, Contour, Split};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::processors::contours::extract_components;
use crate::processors::images::ImageNormalizer;

pub struct SegmentationProcessor {
    normalizer: ImageNormalizer,
    table: Arc<ClassNameTable>,
    threshold: f64,
}

impl SegmentationProcessor {
    pub fn new(config: &AnalysisConfig, table: Arc<ClassNameTable>) -> Self {
        SegmentationProcessor {
            normalizer: ImageNormalizer::new(config.n_image_channels),
            table,
            threshold: config.threshold_soft_labels,
        }
    }

    pub fn process(
        &self,
        images: ArrayD<f32>,
        labels: ArrayD<f32>,
        split: Split,
    ) -> Result<CanonicalBatch> {
        let images = self.normalizer.normalize(images)?;
        let (masks, plane_class_ids) = self.normalize_labels(labels)?;

        if masks.shape()[0] != images.shape()[0] {
            return Err(AnalysisError::Shape(format!(
                "image batch size {} != label batch size {}",
                images.shape()[0],
                masks.shape()[0]
            )));
        }

        let contours = self.extract_contours(&masks, &plane_class_ids);

        Ok(CanonicalBatch {
            images,
            labels: CanonicalLabels::Segmentation { masks, contours },
            split,
        })
    }

    /// Normalize label masks into binary per-class planes `(N, C, H, W)`,
    /// returning the class id carried by each plane.
    fn normalize_labels(&self, labels: ArrayD<f32>) -> Result<(Array4<f32>, Vec<i64>)> {
        let shape = labels.shape().to_vec();
        let n_planes = self.table.len().max(1);

        let four_d: ArrayD<f32> = match shape.len() {
            2 => labels.insert_axis(Axis(0)).insert_axis(Axis(0)),
            3 => {
                if shape[0] == n_planes {
                    // single one-hot mask, (C, H, W)
                    labels.insert_axis(Axis(0))
                } else {
                    // batch of flat masks, (N, H, W)
                    labels.insert_axis(Axis(1))
                }
            }
            4 => {
                if shape[3] == n_planes && shape[1] != n_planes {
                    labels
                        .permuted_axes(vec![0, 3, 1, 2])
                        .as_standard_layout()
                        .to_owned()
                } else {
                    labels
                }
            }
            _ => {
                return Err(AnalysisError::Shape(format!(
                    "unsupported label tensor rank {} ({:?})",
                    shape.len(),
                    shape
                )));
            }
        };
        let four_d = four_d
            .into_dimensionality::<Ix4>()
            .map_err(|e| AnalysisError::Shape(format!("label batch not 4-d: {e}")))?;

        let channels = four_d.shape()[1];
        if channels == 1 {
            let integral = four_d.iter().all(|v| v.fract() == 0.0);
            if integral && self.table.len() > 1 {
                return Ok(self.one_hot_expand(&four_d));
            }
            // continuous single-channel mask: threshold into one
            // foreground plane
            let class_id = self.table.used_ids().first().copied().unwrap_or(0);
            return Ok((self.threshold_planes(four_d), vec![class_id]));
        }

        if channels != self.table.len() {
            return Err(AnalysisError::Shape(format!(
                "label batch carries {} class planes, expected {}",
                channels,
                self.table.len()
            )));
        }
        Ok((
            self.threshold_planes(four_d),
            (0..channels as i64).collect(),
        ))
    }

    fn threshold_planes(&self, labels: Array4<f32>) -> Array4<f32> {
        labels.mapv(|v| if f64::from(v) > self.threshold { 1.0 } else { 0.0 })
    }

    /// Expand an integer-coded `(N, 1, H, W)` mask into binary per-class
    /// planes `(N, n_classes, H, W)`.
    fn one_hot_expand(&self, labels: &Array4<f32>) -> (Array4<f32>, Vec<i64>) {
        let (n, _, h, w) = labels.dim();
        let n_classes = self.table.len();
        let mut planes = Array4::<f32>::zeros((n, n_classes, h, w));
        for i in 0..n {
            for r in 0..h {
                for c in 0..w {
                    let id = labels[[i, 0, r, c]] as usize;
                    if id < n_classes {
                        planes[[i, id, r, c]] = 1.0;
                    }
                }
            }
        }
        (planes, (0..n_classes as i64).collect())
    }

    fn extract_contours(
        &self,
        masks: &Array4<f32>,
        plane_class_ids: &[i64],
    ) -> Vec<Vec<Vec<Contour>>> {
        let n = masks.shape()[0];
        (0..n)
            .map(|i| {
                plane_class_ids
                    .iter()
                    .enumerate()
                    .map(|(plane, &class_id)| {
                        if !self.table.is_used(class_id) {
                            return Vec::new();
                        }
                        let view = masks.index_axis(Axis(0), i);
                        extract_components(view.index_axis(Axis(0), plane), class_id)
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;
    use ndarray::ArrayD;

    fn processor(n_classes: usize, ignore: Vec<i64>) -> SegmentationProcessor {
        let config = AnalysisConfig::builder()
            .task(Task::Segmentation)
            .n_classes(n_classes)
            .ignore_labels(ignore)
            .build()
            .unwrap();
        let table = ClassNameTable::from_config(&config);
        SegmentationProcessor::new(&config, table)
    }

    #[test]
    fn test_soft_labels_thresholded_exactly() {
        // (N=2, C=3, H=4, W=4) images, (N=2, C=1, H=4, W=4) soft labels.
        let images = ArrayD::zeros(vec![2, 3, 4, 4]);
        let mut soft = ArrayD::zeros(vec![2, 1, 4, 4]);
        let mut above = 0usize;
        for i in 0..2 {
            for r in 0..4 {
                for c in 0..4 {
                    let v = ((i * 16 + r * 4 + c) as f32) / 31.0;
                    soft[[i, 0, r, c]] = v;
                    if v > 0.5 {
                        above += 1;
                    }
                }
            }
        }

        let proc = processor(1, vec![]);
        let batch = proc.process(images, soft, Split::Train).unwrap();
        match &batch.labels {
            CanonicalLabels::Segmentation { masks, .. } => {
                assert_eq!(masks.shape()[0], 2);
                let on = masks.iter().filter(|v| **v > 0.5).count();
                assert_eq!(on, above);
            }
            other => panic!("unexpected labels: {}", other.kind()),
        }
    }

    #[test]
    fn test_integer_masks_one_hot_expanded() {
        let images = ArrayD::zeros(vec![1, 3, 4, 4]);
        let mut mask = ArrayD::zeros(vec![1, 4, 4]);
        mask[[0, 1, 1]] = 2.0;
        mask[[0, 1, 2]] = 2.0;
        mask[[0, 3, 3]] = 1.0;

        let proc = processor(3, vec![0]);
        let batch = proc.process(images, mask, Split::Train).unwrap();
        match &batch.labels {
            CanonicalLabels::Segmentation { masks, contours } => {
                assert_eq!(masks.shape(), &[1, 3, 4, 4]);
                assert_eq!(masks[[0, 2, 1, 1]], 1.0);
                assert_eq!(masks[[0, 1, 3, 3]], 1.0);
                // ignored background plane yields no contours
                assert!(contours[0][0].is_empty());
                assert_eq!(contours[0][2].len(), 1);
                assert_eq!(contours[0][2][0].area, 2.0);
            }
            other => panic!("unexpected labels: {}", other.kind()),
        }
    }

    #[test]
    fn test_batch_size_mismatch_is_shape_error() {
        let images = ArrayD::zeros(vec![2, 3, 4, 4]);
        let labels = ArrayD::zeros(vec![3, 1, 4, 4]);
        let proc = processor(1, vec![]);
        let err = proc.process(images, labels, Split::Train).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }

    #[test]
    fn test_wrong_plane_count_is_shape_error() {
        let images = ArrayD::zeros(vec![1, 3, 4, 4]);
        let labels = ArrayD::zeros(vec![1, 5, 4, 4]);
        let proc = processor(3, vec![]);
        let err = proc.process(images, labels, Split::Train).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }
}
