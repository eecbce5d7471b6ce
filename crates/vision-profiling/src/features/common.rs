//! Task-agnostic feature extractors.

use ndarray::Axis;

use crate::aggregation::{Histogram, SplitKeyed, bump, union_zero_fill};
use crate::batch::{CanonicalBatch, Split};
use crate::error::Result;
use crate::features::{Feature, FeatureExtractor, bar_feature};

/// Histogram of image resolutions seen per split.
#[derive(Default)]
pub struct ImageResolutions {
    hist: SplitKeyed<Histogram<String>>,
    images_seen: SplitKeyed<usize>,
}

impl ImageResolutions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for ImageResolutions {
    fn name(&self) -> &'static str {
        "image_resolutions"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        let (h, w) = batch.image_size();
        bump(
            self.hist.get_mut(batch.split),
            format!("{}x{}", w, h),
            batch.batch_size() as f64,
        );
        *self.images_seen.get_mut(batch.split) += batch.batch_size();
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let mut mine = self.hist.get(split).clone();
        let mut sibling = self.hist.get(split.other()).clone();
        union_zero_fill(&mut mine, &mut sibling);

        let (bins, values): (Vec<String>, Vec<f64>) = mine.into_iter().unzip();
        Ok(bar_feature(
            "Image resolutions",
            "Number of images per resolution (width x height) in the split.",
            "Resolution [W x H]",
            "# Of Images",
            bins,
            values,
        )?
        .flagged_empty(*self.images_seen.get(split) == 0))
    }
}

const BRIGHTNESS_BINS: usize = 10;

/// Distribution of mean image brightness, binned over [0, 1].
#[derive(Default)]
pub struct AverageBrightness {
    hist: SplitKeyed<[f64; BRIGHTNESS_BINS]>,
    images_seen: SplitKeyed<usize>,
}

impl AverageBrightness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for AverageBrightness {
    fn name(&self) -> &'static str {
        "average_brightness"
    }

    fn update(&mut self, batch: &CanonicalBatch) -> Result<()> {
        // Pixel values may arrive in [0, 255] or [0, 1].
        let max = batch.images.iter().fold(0.0f32, |m, v| m.max(*v));
        let scale: f64 = if max > 1.0 { 255.0 } else { 1.0 };

        for image in batch.images.axis_iter(Axis(0)) {
            let mean = f64::from(image.mean().unwrap_or(0.0)) / scale;
            let bin = ((mean * BRIGHTNESS_BINS as f64) as usize).min(BRIGHTNESS_BINS - 1);
            self.hist.get_mut(batch.split)[bin] += 1.0;
        }
        *self.images_seen.get_mut(batch.split) += batch.batch_size();
        Ok(())
    }

    fn aggregate(&self, split: Split) -> Result<Feature> {
        let hist = self.hist.get(split);
        let total: f64 = hist.iter().sum();
        let values: Vec<f64> = hist
            .iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect();
        let bins: Vec<String> = (0..BRIGHTNESS_BINS)
            .map(|i| {
                format!(
                    "{:.1}-{:.1}",
                    i as f64 / BRIGHTNESS_BINS as f64,
                    (i + 1) as f64 / BRIGHTNESS_BINS as f64
                )
            })
            .collect();

        Ok(bar_feature(
            "Average image brightness",
            "Distribution of per-image mean brightness, normalized to [0, 1].",
            "Brightness",
            "% Of Images",
            bins,
            values,
        )?
        .flagged_empty(*self.images_seen.get(split) == 0))
    }
}
