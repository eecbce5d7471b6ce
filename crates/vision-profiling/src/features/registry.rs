//! Feature extractor registry: name → factory, plus the default feature
//! set per task.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::batch::ClassNameTable;
use crate::config::{AnalysisConfig, ConfigValidationError, Task};
use crate::error::{AnalysisError, Result};
use crate::features::{FeatureExtractor, classification, common, detection, segmentation};

/// Factory building a fresh extractor instance.
pub type ExtractorFactory =
    fn(&AnalysisConfig, &Arc<ClassNameTable>) -> Box<dyn FeatureExtractor>;

/// Mapping from feature name to extractor factory.
pub struct FeatureRegistry {
    entries: BTreeMap<&'static str, ExtractorFactory>,
}

static BUILTIN: Lazy<FeatureRegistry> = Lazy::new(|| {
    let mut registry = FeatureRegistry {
        entries: BTreeMap::new(),
    };
    registry.register("image_resolutions", |_, _| {
        Box::new(common::ImageResolutions::new())
    });
    registry.register("average_brightness", |_, _| {
        Box::new(common::AverageBrightness::new())
    });
    registry.register("class_distribution", |_, table| {
        Box::new(classification::ClassDistribution::new(table.clone()))
    });
    registry.register("class_distribution_vs_area", |_, table| {
        Box::new(classification::ClassDistributionVsArea::new(table.clone()))
    });
    registry.register("detection_class_distribution", |_, table| {
        Box::new(detection::ClassDistribution::new(table.clone()))
    });
    registry.register("boxes_per_image", |_, _| {
        Box::new(detection::BoxesPerImage::new())
    });
    registry.register("box_area_distribution", |_, _| {
        Box::new(detection::BoxAreaDistribution::new())
    });
    registry.register("segmentation_class_distribution", |_, table| {
        Box::new(segmentation::ClassDistribution::new(table.clone()))
    });
    registry.register("appearances_in_images", |_, table| {
        Box::new(segmentation::AppearancesInImages::new(table.clone()))
    });
    registry.register("components_per_image", |_, _| {
        Box::new(segmentation::ComponentsPerImage::new())
    });
    registry.register("components_area_distribution", |_, _| {
        Box::new(segmentation::ComponentsAreaDistribution::new())
    });
    registry.register("components_convexity", |_, table| {
        Box::new(segmentation::ComponentsConvexity::new(table.clone()))
    });
    registry
});

impl FeatureRegistry {
    /// The process-wide registry of built-in extractors.
    pub fn builtin() -> &'static FeatureRegistry {
        &BUILTIN
    }

    pub fn register(&mut self, name: &'static str, factory: ExtractorFactory) {
        self.entries.insert(name, factory);
    }

    /// Instantiate a fresh extractor by name.
    pub fn create(
        &self,
        name: &str,
        config: &AnalysisConfig,
        table: &Arc<ClassNameTable>,
    ) -> Result<Box<dyn FeatureExtractor>> {
        let factory = self.entries.get(name).ok_or_else(|| {
            AnalysisError::Configuration(ConfigValidationError::UnknownFeature(name.to_string()))
        })?;
        Ok(factory(config, table))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// The default feature list per task.
    pub fn default_features(task: Task) -> &'static [&'static str] {
        match task {
            Task::Classification => &[
                "image_resolutions",
                "average_brightness",
                "class_distribution",
                "class_distribution_vs_area",
            ],
            Task::Detection => &[
                "image_resolutions",
                "average_brightness",
                "detection_class_distribution",
                "boxes_per_image",
                "box_area_distribution",
            ],
            Task::Segmentation => &[
                "image_resolutions",
                "average_brightness",
                "segmentation_class_distribution",
                "appearances_in_images",
                "components_per_image",
                "components_area_distribution",
                "components_convexity",
            ],
        }
    }
}
