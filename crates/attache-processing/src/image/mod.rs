//! Image thumbnails
//!
//! - Box fitting and filter selection (resize)
//! - Decode, downscale and re-encode (processor)

pub mod processor;
pub mod resize;

pub use processor::{ImageProcessor, ThumbnailConfig};
pub use resize::ImageResize;
