//! Frame data structures for the live video feed

use image::RgbaImage;
use std::time::Instant;

/// A single decoded frame from the camera feed
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGBA pixels at the video's intrinsic resolution
    pub image: RgbaImage,
    /// Timestamp when the frame was grabbed
    pub timestamp: Instant,
}

impl VideoFrame {
    /// Wrap a decoded image as a frame
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }

    /// Intrinsic video width (0 before the stream has produced pixels)
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Intrinsic video height
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Whether the stream has produced a frame with real dimensions yet
    pub fn has_dimensions(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}
