//! Attache Processing Library
//!
//! Format-specific processors that turn an uploaded file into a derived asset:
//! image thumbnails and GLB previews of 3D meshes. Video, audio and document
//! attachments are registered as extension points that produce nothing.

pub mod registry;
pub mod scratch;
pub mod stub;
pub mod traits;

#[cfg(feature = "image")]
pub mod image;

#[cfg(feature = "model3d")]
pub mod model3d;

// Re-export commonly used types
pub use registry::ProcessorRegistry;
pub use scratch::ScratchDir;
pub use stub::UnsupportedProcessor;
pub use traits::{DerivedAsset, Processor, ProcessorOutput, SourceMetadata};

#[cfg(feature = "image")]
pub use self::image::{ImageProcessor, ThumbnailConfig};

#[cfg(feature = "model3d")]
pub use model3d::{
    ContainerValidator, Model3dConfig, Model3dProcessor, StructuralValidator, ValidationReport,
};
