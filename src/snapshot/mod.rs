//! Page snapshots.
//!
//! A capturer renders a page, grabs a raster frame and re-encodes it as JPEG
//! so stored blobs stay small. The only capturer that ships is the browser
//! session in [`crate::scrapers::browser`].

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

/// Errors raised while capturing a snapshot.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unsupported,
}

impl CaptureError {
    /// Whether the rendering session is gone for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::Unsupported)
    }
}

/// Renders a page and returns an encoded image.
#[async_trait]
pub trait SnapshotCapturer: Send {
    async fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture(&mut self, url: &str) -> Result<Vec<u8>, CaptureError>;

    async fn close(&mut self) {}
}

/// Re-encode a screenshot (any format `image` can decode) as JPEG.
pub fn encode_jpeg(raw: &[u8], quality: u8) -> Result<Vec<u8>, CaptureError> {
    let frame = image::load_from_memory(raw)?.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    frame.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}
