//! Image adapter: download portal photos and undo their vertical squash.
//!
//! Implements the `cico-core` `ImageProcessor` port. Failures never reach the caller;
//! the original reference is handed back instead.

use std::{io::Cursor, time::Duration};

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tracing::{debug, warn};

use cico_core::{errors::Error, messaging::types::Media, ports::ImageProcessor, Result};

/// Height multiplier applied when stretching is enabled. Width is kept.
pub const STRETCH_FACTOR: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Scale an encoded image's height by `factor`, keeping its width.
///
/// PNG input stays PNG; everything else is re-encoded as JPEG.
pub fn stretch_vertical(bytes: &[u8], factor: f64) -> std::result::Result<Vec<u8>, MediaError> {
    let format = image::guess_format(bytes).unwrap_or(ImageFormat::Jpeg);
    let img = image::load_from_memory(bytes)?;

    let width = img.width();
    let height = ((img.height() as f64) * factor).floor().max(1.0) as u32;
    let stretched = img.resize_exact(width, height, FilterType::Triangle);

    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Png => stretched.write_to(&mut out, ImageFormat::Png)?,
        _ => DynamicImage::ImageRgb8(stretched.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?,
    }
    Ok(out.into_inner())
}

#[derive(Clone, Debug)]
pub struct ImageFetcher {
    http: reqwest::Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("image http client: {e}")))?;
        Ok(Self { http })
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, MediaError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MediaError::Download(format!("status {}", resp.status())));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn try_process(
        &self,
        image_ref: &str,
        stretch: bool,
    ) -> std::result::Result<Vec<u8>, MediaError> {
        let original = self.download(image_ref).await?;
        if !stretch {
            return Ok(original);
        }
        stretch_vertical(&original, STRETCH_FACTOR)
    }
}

#[async_trait]
impl ImageProcessor for ImageFetcher {
    async fn process(&self, image_ref: &str, stretch: bool) -> Media {
        match self.try_process(image_ref, stretch).await {
            Ok(bytes) => {
                debug!(len = bytes.len(), stretch, "image processed");
                Media::Bytes(bytes)
            }
            Err(e) => {
                warn!(error = %e, "image processing failed, sending original reference");
                Media::Url(image_ref.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, format)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn doubles_height_and_keeps_width() {
        let png = encoded(4, 3, ImageFormat::Png);
        let out = stretch_vertical(&png, STRETCH_FACTOR).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (4, 6));
    }

    #[test]
    fn jpeg_stays_jpeg() {
        let jpg = encoded(8, 5, ImageFormat::Jpeg);
        let out = stretch_vertical(&jpg, STRETCH_FACTOR).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (8, 10));
    }

    #[test]
    fn input_bytes_are_untouched() {
        let png = encoded(2, 2, ImageFormat::Png);
        let before = png.clone();
        let _ = stretch_vertical(&png, STRETCH_FACTOR).unwrap();
        assert_eq!(png, before);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            stretch_vertical(b"not an image", STRETCH_FACTOR),
            Err(MediaError::Image(_))
        ));
    }

    #[tokio::test]
    async fn failed_download_falls_back_to_reference() {
        let fetcher = ImageFetcher::new(Duration::from_millis(500)).unwrap();
        let url = "http://127.0.0.1:9/in.jpg";
        assert_eq!(fetcher.process(url, true).await, Media::Url(url.to_string()));
    }
}
