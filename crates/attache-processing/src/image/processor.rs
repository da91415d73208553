//! Image processor - thumbnail generation

use std::io::Cursor;

use attache_core::models::{DerivedKind, JobCategory};
use attache_core::{Config, ProcessingError, ProcessingResultExt};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};

use super::resize::ImageResize;
use crate::traits::{DerivedAsset, Processor, ProcessorOutput, SourceMetadata};

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: 300,
            max_height: 300,
            jpeg_quality: 80,
        }
    }
}

impl From<&Config> for ThumbnailConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_width: config.thumbnail_max_width,
            max_height: config.thumbnail_max_height,
            jpeg_quality: config.thumbnail_jpeg_quality,
        }
    }
}

pub struct ImageProcessor {
    config: ThumbnailConfig,
}

impl ImageProcessor {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    /// Decode, fit into the thumbnail box and re-encode.
    ///
    /// Opaque images become JPEG; images with an alpha channel stay PNG so
    /// transparency survives. Returns (bytes, content_type, extension).
    pub fn thumbnail(
        &self,
        data: &[u8],
    ) -> Result<(Bytes, &'static str, &'static str), ProcessingError> {
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .permanent()?
            .decode()
            .permanent()?;

        let (orig_width, orig_height) = img.dimensions();
        let (width, height) = ImageResize::fit_within(
            orig_width,
            orig_height,
            self.config.max_width,
            self.config.max_height,
        );

        let thumb = if (width, height) == (orig_width, orig_height) {
            img
        } else {
            let filter = ImageResize::select_filter(orig_width, orig_height, width, height);
            img.resize_exact(width, height, filter)
        };

        tracing::debug!(
            orig_width,
            orig_height,
            width,
            height,
            "Resized image for thumbnail"
        );

        let mut buffer = Vec::with_capacity((width * height) as usize / 4);
        if thumb.color().has_alpha() {
            thumb
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
                .permanent()?;
            Ok((Bytes::from(buffer), "image/png", "png"))
        } else {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, self.config.jpeg_quality);
            DynamicImage::ImageRgb8(thumb.to_rgb8())
                .write_with_encoder(encoder)
                .permanent()?;
            Ok((Bytes::from(buffer), "image/jpeg", "jpg"))
        }
    }
}

impl Processor for ImageProcessor {
    fn category(&self) -> JobCategory {
        JobCategory::Image
    }

    fn process(
        &self,
        source: &[u8],
        metadata: &SourceMetadata,
    ) -> Result<ProcessorOutput, ProcessingError> {
        if source.is_empty() {
            return Err(ProcessingError::permanent(anyhow::anyhow!(
                "Image source is empty"
            )));
        }

        let (data, content_type, extension) = self.thumbnail(source)?;

        Ok(ProcessorOutput::Derived(DerivedAsset {
            kind: DerivedKind::Thumbnail,
            data,
            suggested_name: format!("{}_thumb.{}", metadata.stem(), extension),
            content_type: content_type.to_string(),
            compressed: false,
            warnings: Vec::new(),
        }))
    }
}
