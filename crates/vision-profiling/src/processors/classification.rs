//! Classification batch processor: flattens label tensors into per-image
//! class ids.

use std::sync::Arc;

use ndarray::{ArrayD, Axis};

use crate::batch::{CanonicalBatch, CanonicalLabels, ClassNameTable, Split};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::processors::images::ImageNormalizer;

pub struct ClassificationProcessor {
    normalizer: ImageNormalizer,
    table: Arc<ClassNameTable>,
}

impl ClassificationProcessor {
    pub fn new(config: &AnalysisConfig, table: Arc<ClassNameTable>) -> Self {
        ClassificationProcessor {
            normalizer: ImageNormalizer::new(config.n_image_channels),
            table,
        }
    }

    pub fn process(
        &self,
        images: ArrayD<f32>,
        labels: ArrayD<f32>,
        split: Split,
    ) -> Result<CanonicalBatch> {
        let images = self.normalizer.normalize(images)?;
        let class_ids = self.normalize_labels(labels)?;

        if class_ids.len() != images.shape()[0] {
            return Err(AnalysisError::Shape(format!(
                "image batch size {} != label batch size {}",
                images.shape()[0],
                class_ids.len()
            )));
        }

        Ok(CanonicalBatch {
            images,
            labels: CanonicalLabels::Classification { class_ids },
            split,
        })
    }

    fn normalize_labels(&self, labels: ArrayD<f32>) -> Result<Vec<i64>> {
        match labels.ndim() {
            0 => Ok(vec![labels.iter().next().map(|v| v.round() as i64).unwrap_or(0)]),
            1 => Ok(labels.iter().map(|v| v.round() as i64).collect()),
            2 => {
                let cols = labels.shape()[1];
                if cols == 1 {
                    Ok(labels.iter().map(|v| v.round() as i64).collect())
                } else if cols == self.table.len() {
                    // one-hot or probability rows: arg-max per image
                    Ok(labels
                        .axis_iter(Axis(0))
                        .map(|row| {
                            row.iter()
                                .enumerate()
                                .max_by(|a, b| {
                                    a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)
                                })
                                .map(|(i, _)| i as i64)
                                .unwrap_or(0)
                        })
                        .collect())
                } else {
                    Err(AnalysisError::Shape(format!(
                        "classification label rows carry {} fields, expected 1 or {}",
                        cols,
                        self.table.len()
                    )))
                }
            }
            rank => Err(AnalysisError::Shape(format!(
                "unsupported classification label rank {rank}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;
    use ndarray::ArrayD;

    fn processor(n_classes: usize) -> ClassificationProcessor {
        let config = AnalysisConfig::builder()
            .task(Task::Classification)
            .n_classes(n_classes)
            .build()
            .unwrap();
        let table = ClassNameTable::from_config(&config);
        ClassificationProcessor::new(&config, table)
    }

    fn ids_of(batch: &CanonicalBatch) -> &Vec<i64> {
        match &batch.labels {
            CanonicalLabels::Classification { class_ids } => class_ids,
            other => panic!("unexpected labels: {}", other.kind()),
        }
    }

    #[test]
    fn test_flat_label_vector() {
        let images = ArrayD::zeros(vec![3, 3, 8, 8]);
        let labels = ArrayD::from_shape_vec(vec![3], vec![0.0, 2.0, 1.0]).unwrap();
        let batch = processor(3).process(images, labels, Split::Train).unwrap();
        assert_eq!(ids_of(&batch), &vec![0, 2, 1]);
    }

    #[test]
    fn test_one_hot_rows_argmaxed() {
        let images = ArrayD::zeros(vec![2, 3, 8, 8]);
        let labels = ArrayD::from_shape_vec(
            vec![2, 3],
            vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05],
        )
        .unwrap();
        let batch = processor(3).process(images, labels, Split::Val).unwrap();
        assert_eq!(ids_of(&batch), &vec![1, 0]);
    }

    #[test]
    fn test_batch_size_mismatch_is_shape_error() {
        let images = ArrayD::zeros(vec![3, 3, 8, 8]);
        let labels = ArrayD::from_shape_vec(vec![2], vec![0.0, 1.0]).unwrap();
        let err = processor(3).process(images, labels, Split::Train).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }
}
