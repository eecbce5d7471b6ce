//! Classification feature extractors.

use std::collections::BTreeMap;
use std::sync::Arc;

use polars::prelude::*;
use serde_json::json;

use crate::aggregation::{
    Histogram, SplitKeyed, bump, normalized, seeded_class_histogram, to_named_columns,
};
use crate::batch::{CanonicalBatch, CanonicalLabels, ClassNameTable, Split};
use crate::error::Result;
use crate::features::{
    Feature, FeatureExtractor, PlotOptions, ViolinPlotOptions, bar_feature, wrong_labels,
};

/// Share of samples per class.
pub struct ClassDistribution {
    table: Arc<ClassNameTable>,
    counts: SplitKeyed<Histogram<i64>>,
    samples: SplitKeyed<f64>,
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
            samples: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for ClassDistribution {
    fn name(&self) -> &'static str {
        "class_distribution"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let CanonicalLabels::Classification { class_ids } = &batch.labels else {
            return Err(wrong_labels(self.name(), "classification", batch.labels.kind()));
        };
        for &id in class_ids {
            if self.table.is_used(id) {
                bump(self.counts.get_mut(batch.split), id, 1.0);
                *self.samples.get_mut(batch.split) += 1.0;
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
            "Class distribution",
            "Share of samples per class across the split.",
            "Class",
            "% Of Samples",
            bins,
            values,
        )?;
        feature.json = json;
        Ok(feature.flagged_empty(*self.samples.get(split) == 0.0))
    }
}

/// Mean image size per class: highlights classes collected at systematically
/// different resolutions.
pub struct ClassDistributionVsArea {
    table: Arc<ClassNameTable>,
    records: SplitKeyed<Vec<(i64, i64)>>,
}

impl ClassDistributionVsArea {
    pub fn new(table: Arc<ClassNameTable>) -> Self {
        ClassDistributionVsArea {
            table,
            records: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for ClassDistributionVsArea {
    fn name(&self) -> &'static str {
        "class_distribution_vs_area"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let CanonicalLabels::Classification { class_ids } = &batch.labels else {
            return Err(wrong_labels(self.name(), "classification", batch.labels.kind()));
        };
        let (h, w) = batch.image_size();
        let image_size = ((h + w) / 2) as i64;
        for &id in class_ids {
            if self.table.is_used(id) {
                self.records.get_mut(batch.split).push((id, image_size));
            }
        }
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let records = self.records.get(split);

        let class_ids: Vec<i64> = records.iter().map(|(id, _)| *id).collect();
        let class_names: Vec<String> =
            records.iter().map(|(id, _)| self.table.name_of(*id)).collect();
        let image_sizes: Vec<i64> = records.iter().map(|(_, size)| *size).collect();

        let mut grouped: BTreeMap<(String, i64), u64> = BTreeMap::new();
        for (name, size) in class_names.iter().zip(&image_sizes) {
            *grouped.entry((name.clone(), *size)).or_insert(0) += 1;
        }
        let json = serde_json::Value::Array(
            grouped
                .into_iter()
                .map(|((name, size), count)| {
                    json!({ "class_name": name, "image_size": size, "counts": count })
                })
                .collect(),
        );

        let data = df!(
            "class_id" => &class_ids,
            "class_name" => &class_names,
            "image_size" => &image_sizes,
        )?;

        Ok(Feature {
            title: "Image size distribution per class".to_string(),
            description: "Distribution of image size (mean of width and height) per class. \
                          Large per-class differences may bias the model."
                .to_string(),
            data,
            plot_options: PlotOptions::Violin(ViolinPlotOptions {
                x_label_key: "image_size".to_string(),
                x_label_name: "Image size (px)".to_string(),
                y_label_key: "class_name".to_string(),
                y_label_name: "Class".to_string(),
                order_key: Some("class_id".to_string()),
                tight_layout: true,
            }),
            json,
            empty: records.is_empty(),
        })
    }
}
