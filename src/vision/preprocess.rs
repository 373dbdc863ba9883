//! Image binarization for OCR
//!
//! Converts captured stills to pure black/white by luma thresholding.
//! Two strategies implement the same [`Binarizer`] contract: a compute-shader
//! path (feature `gpu`) and a CPU pixel loop. The [`Preprocessor`] tries the
//! GPU first and silently falls back to the CPU on any failure.
//!
//! Luma is `0.299 R + 0.587 G + 0.114 B`. Both strategies evaluate the
//! comparison in integers (`299 R + 587 G + 114 B >= 1000 * threshold`), so
//! their output is bit-identical.

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Default luma threshold
pub const DEFAULT_THRESHOLD: u8 = 160;

/// Luma weights scaled by 1000
const LUMA_R: u32 = 299;
const LUMA_G: u32 = 587;
const LUMA_B: u32 = 114;

/// Errors from a binarization strategy. Never surfaced to the user.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("no GPU adapter available")]
    NoAdapter,
    #[error("GPU device request failed: {0}")]
    Device(String),
    #[error("GPU validation failed: {0}")]
    Validation(String),
    #[error("GPU readback failed: {0}")]
    Readback(String),
    #[error("image of {0} pixels exceeds the dispatch limit")]
    TooLarge(usize),
}

/// Preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Luma threshold: pixels at or above become white
    pub threshold: u8,
    /// Try the compute-shader path before the CPU loop
    pub use_gpu: bool,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            use_gpu: true,
        }
    }
}

/// A binarization strategy
#[async_trait]
pub trait Binarizer: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Binarize the image in place. On error the image is left untouched.
    async fn binarize(&self, image: &mut RgbaImage, threshold: u8) -> Result<(), PreprocessError>;
}

/// Binarized channel value for one RGB triple
#[inline]
pub fn binarize_value(r: u8, g: u8, b: u8, threshold: u8) -> u8 {
    let luma = LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32;
    if luma >= threshold as u32 * 1000 {
        255
    } else {
        0
    }
}

/// Apply the threshold to raw RGBA bytes in place (alpha unchanged)
pub fn binarize_rgba(data: &mut [u8], threshold: u8) {
    for chunk in data.chunks_exact_mut(4) {
        let value = binarize_value(chunk[0], chunk[1], chunk[2], threshold);
        chunk[0] = value;
        chunk[1] = value;
        chunk[2] = value;
    }
}

/// In-place CPU pixel loop. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBinarizer;

#[async_trait]
impl Binarizer for CpuBinarizer {
    fn name(&self) -> &'static str {
        "cpu"
    }

    async fn binarize(&self, image: &mut RgbaImage, threshold: u8) -> Result<(), PreprocessError> {
        binarize_rgba(image, threshold);
        Ok(())
    }
}

/// Capability-checked binarizer selection with CPU fallback
pub struct Preprocessor {
    gpu: Option<Arc<dyn Binarizer>>,
    cpu: CpuBinarizer,
    threshold: u8,
}

impl Preprocessor {
    /// CPU-only preprocessor
    pub fn cpu(threshold: u8) -> Self {
        Self {
            gpu: None,
            cpu: CpuBinarizer,
            threshold,
        }
    }

    /// Preprocessor with an explicit accelerated strategy in front of the CPU
    pub fn with_accelerator(accelerator: Arc<dyn Binarizer>, threshold: u8) -> Self {
        Self {
            gpu: Some(accelerator),
            cpu: CpuBinarizer,
            threshold,
        }
    }

    /// Probe GPU capability once and build the preprocessor
    ///
    /// Without a usable adapter (or with `use_gpu` off, or without the `gpu`
    /// feature) the CPU path is the only one.
    pub async fn detect(settings: &PreprocessSettings) -> Self {
        if !settings.use_gpu {
            info!("GPU preprocessing disabled by configuration");
            return Self::cpu(settings.threshold);
        }

        #[cfg(feature = "gpu")]
        {
            match super::gpu::GpuBinarizer::new().await {
                Ok(gpu) => {
                    info!("GPU preprocessing available ({})", gpu.adapter_name());
                    return Self::with_accelerator(Arc::new(gpu), settings.threshold);
                }
                Err(e) => debug!("GPU preprocessing unavailable: {}", e),
            }
        }

        Self::cpu(settings.threshold)
    }

    /// Configured threshold
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Whether an accelerated strategy is in front of the CPU loop
    pub fn has_accelerator(&self) -> bool {
        self.gpu.is_some()
    }

    /// Binarize with the configured threshold
    pub async fn binarize(&self, image: &mut RgbaImage) {
        self.binarize_with(image, self.threshold).await;
    }

    /// Binarize with an explicit threshold, falling back to the CPU on failure
    pub async fn binarize_with(&self, image: &mut RgbaImage, threshold: u8) {
        if let Some(gpu) = &self.gpu {
            match gpu.binarize(image, threshold).await {
                Ok(()) => return,
                Err(e) => debug!("{} binarization failed, using CPU: {}", gpu.name(), e),
            }
        }

        // The CPU strategy cannot fail
        let _ = self.cpu.binarize(image, threshold).await;
    }
}
