//! Detection batch processor: normalizes heterogeneous box layouts into the
//! canonical `(class_id, x1, y1, x2, y2)` ordering in absolute pixels.

use std::sync::Arc;

use ndarray::{ArrayD, Axis, Ix3};

use crate::batch::{BBox, CanonicalBatch, CanonicalLabels, ClassNameTable, Split};
use crate::config::{AnalysisConfig, BboxFormat};
use crate::error::{AnalysisError, Result};
use crate::processors::images::ImageNormalizer;

/// Tolerance when deciding whether box coordinates are normalized to [0, 1].
const NORMALIZED_EPS: f32 = 1e-6;

pub struct DetectionProcessor {
    normalizer: ImageNormalizer,
    table: Arc<ClassNameTable>,
    bbox_format: BboxFormat,
    is_label_first: bool,
}

impl DetectionProcessor {
    pub fn new(config: &AnalysisConfig, table: Arc<ClassNameTable>) -> Self {
        DetectionProcessor {
            normalizer: ImageNormalizer::new(config.n_image_channels),
            table,
            bbox_format: config.bbox_format,
            is_label_first: config.is_label_first,
        }
    }

    pub fn process(
        &self,
        images: ArrayD<f32>,
        labels: ArrayD<f32>,
        split: Split,
    ) -> Result<CanonicalBatch> {
        let images = self.normalizer.normalize(images)?;
        let (height, width) = (images.shape()[2], images.shape()[3]);

        let labels = match labels.ndim() {
            2 => labels.insert_axis(Axis(0)),
            3 => labels,
            rank => {
                return Err(AnalysisError::Shape(format!(
                    "unsupported detection label rank {rank}"
                )));
            }
        };
        let labels = labels
            .into_dimensionality::<Ix3>()
            .map_err(|e| AnalysisError::Shape(format!("detection labels not 3-d: {e}")))?;

        if labels.shape()[2] != 5 {
            return Err(AnalysisError::Shape(format!(
                "detection label rows carry {} fields, expected 5",
                labels.shape()[2]
            )));
        }
        if labels.shape()[0] != images.shape()[0] {
            return Err(AnalysisError::Shape(format!(
                "image batch size {} != label batch size {}",
                images.shape()[0],
                labels.shape()[0]
            )));
        }

        // Coordinates with no value beyond 1.0 are taken as normalized and
        // scaled to pixels.
        let coords_normalized = {
            let mut max_coord = 0.0f32;
            for row in labels.rows() {
                for (k, v) in row.iter().enumerate() {
                    let is_coord = if self.is_label_first { k >= 1 } else { k < 4 };
                    if is_coord {
                        max_coord = max_coord.max(v.abs());
                    }
                }
            }
            max_coord > 0.0 && max_coord <= 1.0 + NORMALIZED_EPS
        };

        let mut boxes: Vec<Vec<BBox>> = Vec::with_capacity(labels.shape()[0]);
        for image_rows in labels.axis_iter(Axis(0)) {
            let mut image_boxes = Vec::new();
            for row in image_rows.rows() {
                let fields: Vec<f32> = row.iter().copied().collect();
                if fields.iter().all(|v| *v == 0.0) {
                    continue; // padding row
                }

                let (class_field, coords) = if self.is_label_first {
                    (fields[0], [fields[1], fields[2], fields[3], fields[4]])
                } else {
                    (fields[4], [fields[0], fields[1], fields[2], fields[3]])
                };

                let (x1, y1, x2, y2) = to_xyxy(self.bbox_format, coords);
                let (x1, y1, x2, y2) = if coords_normalized {
                    (
                        x1 * width as f32,
                        y1 * height as f32,
                        x2 * width as f32,
                        y2 * height as f32,
                    )
                } else {
                    (x1, y1, x2, y2)
                };

                let class_id = class_field.round() as i64;
                if !self.table.is_used(class_id) {
                    continue;
                }
                image_boxes.push(BBox {
                    class_id,
                    x1,
                    y1,
                    x2,
                    y2,
                });
            }
            boxes.push(image_boxes);
        }

        Ok(CanonicalBatch {
            images,
            labels: CanonicalLabels::Detection { boxes },
            split,
        })
    }
}

/// Convert one coordinate quadruple into corner format.
fn to_xyxy(format: BboxFormat, [a, b, c, d]: [f32; 4]) -> (f32, f32, f32, f32) {
    match format {
        BboxFormat::Xyxy => (a, b, c, d),
        BboxFormat::Xywh => (a, b, a + c, b + d),
        BboxFormat::Cxcywh => (a - c / 2.0, b - d / 2.0, a + c / 2.0, b + d / 2.0),
    }
}
