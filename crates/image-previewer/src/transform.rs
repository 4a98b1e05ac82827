//! Image validation and fill/crop resizing
//!
//! Decoding and encoding are CPU bound and run on the blocking thread pool.

use crate::error::TransformError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Content type of every resized image
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

const JPEG_QUALITY: u8 = 85;

/// Validates source bytes and produces exact-size JPEG thumbnails
#[derive(Debug, Clone)]
pub struct ImageTransform {
    filter: FilterType,
    quality: u8,
}

impl ImageTransform {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
            quality: JPEG_QUALITY,
        }
    }

    /// Check that `data` is a raster image this build can decode.
    ///
    /// Only the magic bytes are inspected; the image is not decoded.
    pub fn validate(&self, data: &[u8]) -> Result<ImageFormat, TransformError> {
        match image::guess_format(data) {
            Ok(format) if format.reading_enabled() => Ok(format),
            Ok(format) => {
                warn!(format = ?format, "Unsupported image format");
                Err(TransformError::InvalidImage(format!(
                    "unsupported format {:?}",
                    format
                )))
            }
            Err(_) => {
                warn!(size = data.len(), "Fetched file is not an image");
                Err(TransformError::InvalidImage(
                    "unrecognized content".to_string(),
                ))
            }
        }
    }

    /// Resize `data` to exactly `width` x `height` and encode it as JPEG.
    ///
    /// The source is scaled to cover the target box and the overflow is
    /// cropped around the center; smaller sources are upscaled. Returns
    /// `Cancelled` without decoding if `cancel` already fired.
    pub async fn resize(
        &self,
        cancel: &CancellationToken,
        data: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, TransformError> {
        if cancel.is_cancelled() {
            warn!("Resize cancelled before start");
            return Err(TransformError::Cancelled);
        }

        let transform = self.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            // The task may have queued behind other resizes
            if cancel.is_cancelled() {
                return Err(TransformError::Cancelled);
            }
            transform.fill(&data, width, height)
        })
        .await
        .map_err(|e| TransformError::Task(e.to_string()))?
    }

    /// Synchronous decode → fill/crop → encode
    pub fn fill(&self, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, TransformError> {
        let img = decode(data)?;
        let (src_width, src_height) = img.dimensions();

        let mut filled = img.resize_to_fill(width, height, self.filter);
        if filled.dimensions() != (width, height) {
            filled = filled.resize_exact(width, height, self.filter);
        }

        let encoded = self.encode(&filled)?;
        debug!(
            src_width,
            src_height,
            width,
            height,
            size = encoded.len(),
            "Resized image"
        );
        Ok(encoded)
    }

    fn encode(&self, img: &DynamicImage) -> Result<Vec<u8>, TransformError> {
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        rgb.write_with_encoder(encoder)
            .map_err(TransformError::Encode)?;
        Ok(buffer)
    }
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, TransformError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(image::ImageError::IoError(e)))?
        .decode()
        .map_err(TransformError::Decode)
}
