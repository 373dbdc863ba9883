//! Camera source port
//!
//! The live camera lives outside this crate. The pipeline only needs to
//! start/stop a device and pull the latest decoded frame. File-backed sources
//! stand in for a camera when driving the pipeline from the CLI.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::frame::VideoFrame;

/// Camera failures. These are surfaced to the user once and stop auto mode.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("camera access denied")]
    AccessDenied,
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera is not started")]
    NotStarted,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// A video input device as reported by the camera source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

/// Live video feed
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// List available input devices
    async fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError>;

    /// Start (or restart) the stream on the given device, or the default one
    async fn start(&self, device_id: Option<&str>) -> Result<(), CameraError>;

    /// Stop the stream
    async fn stop(&self);

    /// Latest decoded frame, `None` when no frame is ready yet
    fn latest_frame(&self) -> Result<Option<VideoFrame>, CameraError>;
}

/// Serves a single still image as if it were a camera
pub struct ImageFileSource {
    path: PathBuf,
    frame: Mutex<Option<VideoFrame>>,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    async fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(vec![device_for(&self.path)])
    }

    async fn start(&self, _device_id: Option<&str>) -> Result<(), CameraError> {
        let frame = load_frame(&self.path)?;
        info!("Image source started: {:?} ({}x{})", self.path, frame.width(), frame.height());
        *self.frame.lock() = Some(frame);
        Ok(())
    }

    async fn stop(&self) {
        *self.frame.lock() = None;
    }

    fn latest_frame(&self) -> Result<Option<VideoFrame>, CameraError> {
        match self.frame.lock().as_ref() {
            Some(frame) => Ok(Some(frame.clone())),
            None => Err(CameraError::NotStarted),
        }
    }
}

/// Cycles through the image files of a directory, one per frame request
pub struct DirectorySource {
    dir: PathBuf,
    state: Mutex<Option<DirectoryState>>,
}

struct DirectoryState {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FrameSource for DirectorySource {
    async fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(vec![device_for(&self.dir)])
    }

    async fn start(&self, _device_id: Option<&str>) -> Result<(), CameraError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {}", self.dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }

        info!("Directory source started with {} frames from {:?}", files.len(), self.dir);
        *self.state.lock() = Some(DirectoryState { files, next: 0 });
        Ok(())
    }

    async fn stop(&self) {
        *self.state.lock() = None;
    }

    fn latest_frame(&self) -> Result<Option<VideoFrame>, CameraError> {
        let path = {
            let mut guard = self.state.lock();
            let state = guard.as_mut().ok_or(CameraError::NotStarted)?;
            let path = state.files[state.next].clone();
            state.next = (state.next + 1) % state.files.len();
            path
        };
        debug!("Serving frame {:?}", path);
        load_frame(&path).map(Some)
    }
}

fn device_for(path: &Path) -> DeviceInfo {
    DeviceInfo {
        id: path.display().to_string(),
        label: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

fn load_frame(path: &Path) -> Result<VideoFrame, CameraError> {
    let image = image::open(path)
        .map_err(|e| CameraError::Unavailable(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    Ok(VideoFrame::new(image))
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
        .unwrap_or(false)
}
