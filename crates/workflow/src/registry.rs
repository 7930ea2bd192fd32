//! The set of generation providers the engine drives.

use std::sync::Arc;

use polyform_providers::GenerationProvider;

/// Providers by role. `image` renders source images for the text workflow;
/// `model` owns every 3D job, including floorplans.
#[derive(Clone)]
pub struct ProviderRegistry {
    pub image: Arc<dyn GenerationProvider>,
    pub model: Arc<dyn GenerationProvider>,
}

impl ProviderRegistry {
    pub fn new(image: Arc<dyn GenerationProvider>, model: Arc<dyn GenerationProvider>) -> Self {
        Self { image, model }
    }
}
