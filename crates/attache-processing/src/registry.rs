//! Static dispatch table from job category to processor.

use std::collections::HashMap;
use std::sync::Arc;

use attache_core::models::JobCategory;
use attache_core::Config;

use crate::stub::UnsupportedProcessor;
use crate::traits::Processor;

/// Built once at startup and shared by every worker. New categories are
/// served by registering a processor; the dispatcher never changes.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobCategory, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the image and 3D model processors configured from `config`
    /// and no-op stubs for every other category.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        for category in [JobCategory::Video, JobCategory::Audio, JobCategory::Document] {
            registry.register(UnsupportedProcessor::new(category));
        }

        #[cfg(feature = "image")]
        registry.register(crate::image::ImageProcessor::new(
            crate::image::ThumbnailConfig::from(config),
        ));
        #[cfg(not(feature = "image"))]
        registry.register(UnsupportedProcessor::new(JobCategory::Image));

        #[cfg(feature = "model3d")]
        registry.register(crate::model3d::Model3dProcessor::new(
            crate::model3d::Model3dConfig::from(config),
        ));
        #[cfg(not(feature = "model3d"))]
        registry.register(UnsupportedProcessor::new(JobCategory::Model3d));

        registry
    }

    /// Register a processor under its own category, replacing any previous one.
    pub fn register<P: Processor + 'static>(&mut self, processor: P) -> &mut Self {
        self.register_arc(Arc::new(processor))
    }

    pub fn register_arc(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        let category = processor.category();
        if self.processors.insert(category, processor).is_some() {
            tracing::debug!(category = %category, "Replaced registered processor");
        }
        self
    }

    pub fn get(&self, category: JobCategory) -> Option<Arc<dyn Processor>> {
        self.processors.get(&category).cloned()
    }

    pub fn categories(&self) -> Vec<JobCategory> {
        let mut categories: Vec<JobCategory> = self.processors.keys().copied().collect();
        categories.sort_by_key(|c| c.priority());
        categories
    }
}
