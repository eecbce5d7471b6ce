//! Detection feature extractors.

use std::sync::Arc;

use serde_json::json;

use crate::aggregation::{
    Histogram, SplitKeyed, bump, normalized, seeded_class_histogram, to_named_columns,
    union_zero_fill,
};
use crate::batch::{CanonicalBatch, CanonicalLabels, ClassNameTable, Split};
use crate::error::Result;
use crate::features::{Feature, FeatureExtractor, bar_feature, wrong_labels};

/// Share of box instances per class.
pub struct ClassDistribution {
    table: Arc<ClassNameTable>,
    counts: SplitKeyed<Histogram<i64>>,
    boxes_seen: SplitKeyed<f64>,
}

impl ClassDistribution {
    pub fn new(table: Arc<ClassNameTable>) -> Self {
        let seeded = seeded_class_histogram(&table);
        let mut counts: SplitKeyed<Histogram<i64>> = SplitKeyed::default();
        *counts.get_mut(Split::Train) = seeded.clone();
        *counts.get_mut(Split::Val) = seeded;
        ClassDistribution {
            table,
            counts,
            boxes_seen: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for ClassDistribution {
    fn name(&self) -> &'static str {
        "detection_class_distribution"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let CanonicalLabels::Detection { boxes } = &batch.labels else {
            return Err(wrong_labels(self.name(), "detection", batch.labels.kind()));
        };
        for image_boxes in boxes {
            for bbox in image_boxes {
                bump(self.counts.get_mut(batch.split), bbox.class_id, 1.0);
                *self.boxes_seen.get_mut(batch.split) += 1.0;
            }
        }
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let counts = self.counts.get(split);
        let (bins, values) = to_named_columns(&normalized(counts), &self.table);
        let (_, raw) = to_named_columns(counts, &self.table);

        let json = serde_json::Value::Array(
            bins.iter()
                .zip(&raw)
                .map(|(name, count)| json!({ "class": name, "count": count }))
                .collect(),
        );
        let mut feature = bar_feature(
            "Classes distribution across dataset",
            "Share of bounding-box instances per class.",
            "Class",
            "% Class instances",
            bins,
            values,
        )?;
        feature.json = json;
        Ok(feature.flagged_empty(*self.boxes_seen.get(split) == 0.0))
    }
}

/// Histogram of the number of boxes per image.
#[derive(Default)]
pub struct BoxesPerImage {
    hist: SplitKeyed<Histogram<i64>>,
    images_seen: SplitKeyed<usize>,
}

impl BoxesPerImage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for BoxesPerImage {
    fn name(&self) -> &'static str {
        "boxes_per_image"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let CanonicalLabels::Detection { boxes } = &batch.labels else {
            return Err(wrong_labels(self.name(), "detection", batch.labels.kind()));
        };
        for image_boxes in boxes {
            bump(self.hist.get_mut(batch.split), image_boxes.len() as i64, 1.0);
        }
        *self.images_seen.get_mut(batch.split) += batch.batch_size();
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let mut mine = self.hist.get(split).clone();
        let mut sibling = self.hist.get(split.other()).clone();
        union_zero_fill(&mut mine, &mut sibling);

        let norm = normalized(&mine);
        let (bins, values): (Vec<String>, Vec<f64>) =
            norm.into_iter().map(|(k, v)| (k.to_string(), v)).unzip();

        Ok(bar_feature(
            "Objects per image",
            "Distribution of the number of bounding boxes per image.",
            "# Objects in image",
            "% Of Images",
            bins,
            values,
        )?
        .flagged_empty(*self.images_seen.get(split) == 0))
    }
}

pub(crate) const AREA_BINS: usize = 11;

/// Bin labels for object-area fractions of the image.
pub(crate) fn area_bin_labels() -> Vec<String> {
    let mut labels = vec!["<1%".to_string()];
    labels.extend((1..AREA_BINS - 1).map(|i| format!("{}-{}%", i, i + 1)));
    labels.push(">10%".to_string());
    labels
}

/// Bin index for an object covering `fraction` of its image.
pub(crate) fn area_bin_index(fraction: f64) -> usize {
    ((fraction * 100.0) as usize).min(AREA_BINS - 1)
}

/// Distribution of box area as a fraction of the image area.
#[derive(Default)]
pub struct BoxAreaDistribution {
    hist: SplitKeyed<[f64; AREA_BINS]>,
    boxes_seen: SplitKeyed<usize>,
}

impl BoxAreaDistribution {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for BoxAreaDistribution {
    fn name(&self) -> &'static str {
        "box_area_distribution"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let CanonicalLabels::Detection { boxes } = &batch.labels else {
            return Err(wrong_labels(self.name(), "detection", batch.labels.kind()));
        };
        let (h, w) = batch.image_size();
        let image_area = (h * w) as f64;
        for image_boxes in boxes {
            for bbox in image_boxes {
                let fraction = f64::from(bbox.area()) / image_area;
                self.hist.get_mut(batch.split)[area_bin_index(fraction)] += 1.0;
                *self.boxes_seen.get_mut(batch.split) += 1;
            }
        }
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let hist = self.hist.get(split);
        let total: f64 = hist.iter().sum();
        let values: Vec<f64> = hist
            .iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect();

        Ok(bar_feature(
            "Bounding box sizes",
            "Distribution of box area as a fraction of image area.",
            "Object Size [% of image]",
            "% Of Objects",
            area_bin_labels(),
            values,
        )?
        .flagged_empty(*self.boxes_seen.get(split) == 0))
    }
}
