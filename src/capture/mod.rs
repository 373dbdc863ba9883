//! Frame Capture Layer
//!
//! Turns the user's selection over the live video into a still image ready
//! for preprocessing. Capture never fails loudly: when the stream has not
//! started or the crop is degenerate the capture is skipped and retried on
//! the next attempt.

pub mod frame;
pub mod geometry;
pub mod source;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use frame::VideoFrame;
pub use geometry::{map_region_to_crop, DisplayRect, NormalizedRegion, PixelCrop};
pub use source::{CameraError, DeviceInfo, DirectorySource, FrameSource, ImageFileSource};

/// Default cap on the width of captured stills
pub const DEFAULT_MAX_CAPTURE_WIDTH: u32 = 720;

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Maximum width of the captured still, aspect ratio preserved
    pub max_width: u32,
    /// Minimum fraction of the frame a region must span on both axes
    pub min_region_fraction: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_CAPTURE_WIDTH,
            min_region_fraction: geometry::DEFAULT_MIN_REGION_FRACTION,
        }
    }
}

/// Copy `crop` out of the frame, downscaled so it is at most `max_width` wide
///
/// Returns `None` when the video has no dimensions yet or the crop does not
/// overlap the frame. Callers treat `None` as "skipped, retry later".
pub fn capture_frame(frame: &VideoFrame, crop: PixelCrop, max_width: u32) -> Option<RgbaImage> {
    if !frame.has_dimensions() {
        debug!("Capture skipped: video has no dimensions yet");
        return None;
    }

    let (fw, fh) = frame.dimensions();
    if crop.sw == 0 || crop.sh == 0 || crop.sx >= fw || crop.sy >= fh {
        debug!("Capture skipped: degenerate crop {:?} for {}x{} frame", crop, fw, fh);
        return None;
    }

    let sw = crop.sw.min(fw - crop.sx);
    let sh = crop.sh.min(fh - crop.sy);
    let cropped = imageops::crop_imm(&frame.image, crop.sx, crop.sy, sw, sh).to_image();

    let max_width = max_width.max(1);
    if sw <= max_width {
        return Some(cropped);
    }

    let scale = max_width as f64 / sw as f64;
    let out_h = ((sh as f64 * scale).floor() as u32).max(1);
    Some(imageops::resize(&cropped, max_width, out_h, FilterType::Triangle))
}

/// Map the region onto the frame and capture it in one step
pub fn capture_region(
    frame: &VideoFrame,
    region: &NormalizedRegion,
    display: DisplayRect,
    max_width: u32,
) -> Option<RgbaImage> {
    if !frame.has_dimensions() {
        return None;
    }
    let crop = map_region_to_crop(region, display, frame.width(), frame.height());
    capture_frame(frame, crop, max_width)
}
