//! Segmentation feature extractors.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::aggregation::{
    Histogram, SplitKeyed, bump, normalized, seeded_class_histogram, to_named_columns,
    union_zero_fill,
};
use crate::batch::{CanonicalBatch, CanonicalLabels, ClassNameTable, Contour, Split};
use crate::error::Result;
use crate::features::detection::{area_bin_index, area_bin_labels};
use crate::features::{Feature, FeatureExtractor, bar_feature, wrong_labels};
use crate::processors::contours::{convex_hull, polygon_perimeter};

fn contours_of<'a>(
    name: &'static str,
    batch: &'a CanonicalBatch,
) -> Result<&'a Vec<Vec<Vec<Contour>>>> {
    match &batch.labels {
        CanonicalLabels::Segmentation { contours, .. } => Ok(contours),
        other => Err(wrong_labels(name, "segmentation", other.kind())),
    }
}

/// Share of connected components per class.
pub struct ClassDistribution {
    table: Arc<ClassNameTable>,
    counts: SplitKeyed<Histogram<i64>>,
    components_seen: SplitKeyed<f64>,
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
            components_seen: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for ClassDistribution {
    fn name(&self) -> &'static str {
        "segmentation_class_distribution"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let contours = contours_of(self.name(), batch)?;
        for image_contours in contours {
            for cls_contours in image_contours {
                if let Some(first) = cls_contours.first() {
                    bump(
                        self.counts.get_mut(batch.split),
                        first.class_id,
                        cls_contours.len() as f64,
                    );
                    *self.components_seen.get_mut(batch.split) += cls_contours.len() as f64;
                }
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
            "Share of mask components per class.",
            "Class",
            "% Class instances",
            bins,
            values,
        )?;
        feature.json = json;
        Ok(feature.flagged_empty(*self.components_seen.get(split) == 0.0))
    }
}

/// For each class, the share of images it appears in.
pub struct AppearancesInImages {
    table: Arc<ClassNameTable>,
    appearances: SplitKeyed<Histogram<i64>>,
    images_seen: SplitKeyed<f64>,
}

impl AppearancesInImages {
    pub fn new(table: Arc<ClassNameTable>) -> Self {
        let seeded = seeded_class_histogram(&table);
        let mut appearances: SplitKeyed<Histogram<i64>> = SplitKeyed::default();
        *appearances.get_mut(Split::Train) = seeded.clone();
        *appearances.get_mut(Split::Val) = seeded;
        AppearancesInImages {
            table,
            appearances,
            images_seen: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for AppearancesInImages {
    fn name(&self) -> &'static str {
        "appearances_in_images"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let contours = contours_of(self.name(), batch)?;
        *self.images_seen.get_mut(batch.split) += batch.batch_size() as f64;
        for image_contours in contours {
            for cls_contours in image_contours {
                if let Some(first) = cls_contours.first() {
                    bump(self.appearances.get_mut(batch.split), first.class_id, 1.0);
                }
            }
        }
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let images_seen = *self.images_seen.get(split);
        let hist = self.appearances.get(split);
        let scaled: Histogram<i64> = hist
            .iter()
            .map(|(k, v)| (*k, if images_seen > 0.0 { v / images_seen } else { 0.0 }))
            .collect();
        let (bins, values) = to_named_columns(&scaled, &self.table);

        Ok(bar_feature(
            "% Images that class appears in",
            "For each class, the share of images of the split containing it.",
            "Class",
            "Images appeared in [%]",
            bins,
            values,
        )?
        .flagged_empty(images_seen == 0.0))
    }
}

/// Histogram of the number of components per image.
#[derive(Default)]
pub struct ComponentsPerImage {
    hist: SplitKeyed<Histogram<i64>>,
    images_seen: SplitKeyed<usize>,
}

impl ComponentsPerImage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for ComponentsPerImage {
    fn name(&self) -> &'static str {
        "components_per_image"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let contours = contours_of(self.name(), batch)?;
        for image_contours in contours {
            let count: usize = image_contours.iter().map(Vec::len).sum();
            bump(self.hist.get_mut(batch.split), count as i64, 1.0);
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
            "Distribution of the number of mask components per image.",
            "# Objects in image",
            "% Of Images",
            bins,
            values,
        )?
        .flagged_empty(*self.images_seen.get(split) == 0))
    }
}

/// Distribution of component area as a fraction of the image area.
#[derive(Default)]
pub struct ComponentsAreaDistribution {
    hist: SplitKeyed<[f64; super::detection::AREA_BINS]>,
    components_seen: SplitKeyed<usize>,
}

impl ComponentsAreaDistribution {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for ComponentsAreaDistribution {
    fn name(&self) -> &'static str {
        "components_area_distribution"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let contours = contours_of(self.name(), batch)?;
        let (h, w) = batch.image_size();
        let image_area = (h * w) as f64;
        for image_contours in contours {
            for contour in image_contours.iter().flatten() {
                let fraction = contour.area / image_area;
                self.hist.get_mut(batch.split)[area_bin_index(fraction)] += 1.0;
                *self.components_seen.get_mut(batch.split) += 1;
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
            "Object sizes",
            "Distribution of mask-component area as a fraction of image area.",
            "Object Size [% of image]",
            "% Of Objects",
            area_bin_labels(),
            values,
        )?
        .flagged_empty(*self.components_seen.get(split) == 0))
    }
}

/// Mean convexity measure per class.
///
/// Convexity of a component is `(perimeter - hull_perimeter) / perimeter`:
/// zero for convex shapes, approaching one for heavily indented ones.
pub struct ComponentsConvexity {
    table: Arc<ClassNameTable>,
    measures: SplitKeyed<BTreeMap<i64, Vec<f64>>>,
}

impl ComponentsConvexity {
    pub fn new(table: Arc<ClassNameTable>) -> Self {
        ComponentsConvexity {
            table,
            measures: SplitKeyed::default(),
        }
    }
}

impl FeatureExtractor for ComponentsConvexity {
    fn name(&self) -> &'static str {
        "components_convexity"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let contours = contours_of(self.name(), batch)?;
        for image_contours in contours {
            for contour in image_contours.iter().flatten() {
                if contour.perimeter == 0.0 {
                    continue;
                }
                let hull = convex_hull(&contour.points);
                let hull_perimeter = polygon_perimeter(&hull);
                let measure = (contour.perimeter - hull_perimeter) / contour.perimeter;
                self.measures
                    .get_mut(batch.split)
                    .entry(contour.class_id)
                    .or_default()
                    .push(measure);
            }
        }
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let measures = self.measures.get(split);
        let mut means: Histogram<i64> = seeded_class_histogram(&self.table);
        for (class_id, values) in measures {
            if !values.is_empty() {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                means.insert(*class_id, (mean * 1000.0).round() / 1000.0);
            }
        }
        let (bins, values) = to_named_columns(&means, &self.table);

        Ok(bar_feature(
            "Convexity of components",
            "Mean convexity measure of mask components per class.",
            "Class",
            "Convexity measure",
            bins,
            values,
        )?
        .flagged_empty(measures.values().all(Vec::is_empty)))
    }
}
