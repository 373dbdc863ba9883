//! Selection geometry
//!
//! Maps a normalized selection drawn over the displayed video onto
//! source-pixel crop coordinates. The video is drawn contain-fit inside its
//! container, so one axis usually carries letterbox bands that must be
//! subtracted before scaling back into the video's intrinsic resolution.

use serde::{Deserialize, Serialize};

/// Default minimum fraction of the frame a region must cover on each axis
pub const DEFAULT_MIN_REGION_FRACTION: f32 = 0.05;

/// Selection rectangle relative to the displayed video element (0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRegion {
    /// Create a region, clamping every component into the unit square
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: width.clamp(0.0, 1.0 - x),
            height: height.clamp(0.0, 1.0 - y),
        }
    }

    /// Build a region from two drag points given in normalized coordinates
    ///
    /// The points may arrive in any order (the user can drag backwards).
    pub fn from_drag(start: (f32, f32), end: (f32, f32)) -> Self {
        let min_x = start.0.min(end.0);
        let min_y = start.1.min(end.1);
        let max_x = start.0.max(end.0);
        let max_y = start.1.max(end.1);
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Move the region by a normalized delta, keeping it inside the frame
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: (self.x + dx).clamp(0.0, 1.0 - self.width),
            y: (self.y + dy).clamp(0.0, 1.0 - self.height),
            width: self.width,
            height: self.height,
        }
    }

    /// Whether both dimensions exceed the given fraction of the frame
    pub fn is_usable(&self, min_fraction: f32) -> bool {
        self.width > min_fraction && self.height > min_fraction
    }
}

/// Size of the container the video is displayed in, in display pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRect {
    pub width: f32,
    pub height: f32,
}

impl DisplayRect {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Crop rectangle in source (intrinsic video) pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelCrop {
    pub sx: u32,
    pub sy: u32,
    pub sw: u32,
    pub sh: u32,
}

/// How a video of one size is drawn contain-fit inside a container
#[derive(Debug, Clone, Copy, PartialEq)]
struct ContainFit {
    scale: f64,
    drawn_width: f64,
    drawn_height: f64,
    offset_x: f64,
    offset_y: f64,
}

impl ContainFit {
    fn compute(display_width: f64, display_height: f64, video_width: f64, video_height: f64) -> Self {
        let scale = (display_width / video_width).min(display_height / video_height);
        let drawn_width = video_width * scale;
        let drawn_height = video_height * scale;
        Self {
            scale,
            drawn_width,
            drawn_height,
            offset_x: (display_width - drawn_width) / 2.0,
            offset_y: (display_height - drawn_height) / 2.0,
        }
    }
}

/// Convert a normalized selection into source-pixel crop coordinates
///
/// Always returns a crop inside `[0, video_width] x [0, video_height]` with a
/// width and height of at least one pixel. A display with no area is treated
/// as if it showed the video at its intrinsic size.
pub fn map_region_to_crop(
    region: &NormalizedRegion,
    display: DisplayRect,
    video_width: u32,
    video_height: u32,
) -> PixelCrop {
    if video_width == 0 || video_height == 0 {
        return PixelCrop { sx: 0, sy: 0, sw: 1, sh: 1 };
    }

    let vw = f64::from(video_width);
    let vh = f64::from(video_height);
    let (dw, dh) = if display.width > 0.0 && display.height > 0.0 {
        (f64::from(display.width), f64::from(display.height))
    } else {
        (vw, vh)
    };

    let fit = ContainFit::compute(dw, dh, vw, vh);
    let (x, y) = (f64::from(region.x), f64::from(region.y));
    let (w, h) = (f64::from(region.width), f64::from(region.height));

    // Region in display pixels, shifted into the drawn video area
    let left = (x * dw - fit.offset_x).clamp(0.0, fit.drawn_width);
    let top = (y * dh - fit.offset_y).clamp(0.0, fit.drawn_height);
    let right = ((x + w) * dw - fit.offset_x).clamp(0.0, fit.drawn_width);
    let bottom = ((y + h) * dh - fit.offset_y).clamp(0.0, fit.drawn_height);

    let sx = ((left / fit.scale).floor() as u32).min(video_width - 1);
    let sy = ((top / fit.scale).floor() as u32).min(video_height - 1);
    let sw = (((right - left) / fit.scale).floor() as u32)
        .max(1)
        .min(video_width - sx);
    let sh = (((bottom - top) / fit.scale).floor() as u32)
        .max(1)
        .min(video_height - sy);

    PixelCrop { sx, sy, sw, sh }
}
