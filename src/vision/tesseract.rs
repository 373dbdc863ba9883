//! Tesseract command-line engine
//!
//! Runs the `tesseract` executable on a PNG temp file and reads the text from
//! stdout. The factory checks the executable once at construction.

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use super::ocr::{
    EngineFactory, ProgressSink, Recognition, RecognitionEngine, RecognitionError,
    RecognitionProgress, PHASE_RECOGNIZING,
};

/// Recognition engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Path or name of the tesseract executable
    pub executable: PathBuf,
    /// Language models, joined with '+'
    pub languages: String,
    /// Page segmentation mode
    pub page_segmentation_mode: u8,
    /// Override for the tessdata directory
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            languages: "jpn+eng".to_string(),
            // Single uniform block of text
            page_segmentation_mode: 6,
            tessdata_dir: None,
        }
    }
}

impl RecognitionSettings {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Engine that shells out to tesseract per image
pub struct TesseractEngine {
    settings: RecognitionSettings,
    version: String,
}

impl TesseractEngine {
    /// Reported tesseract version line
    pub fn version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &self,
        image: &RgbaImage,
        progress: ProgressSink,
    ) -> Result<Recognition, RecognitionError> {
        let input = NamedTempFile::with_suffix(".png")
            .map_err(|e| RecognitionError::Inference(format!("temp file: {}", e)))?;
        image
            .save(input.path())
            .map_err(|e| RecognitionError::Inference(format!("encode image: {}", e)))?;

        progress(RecognitionProgress {
            phase: PHASE_RECOGNIZING.to_string(),
            progress: 0.0,
        });

        let output = self
            .settings
            .command()
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.languages)
            .arg("--psm")
            .arg(self.settings.page_segmentation_mode.to_string())
            .output()
            .await
            .map_err(|e| RecognitionError::Inference(format!("failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Inference(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        progress(RecognitionProgress {
            phase: PHASE_RECOGNIZING.to_string(),
            progress: 1.0,
        });

        Ok(Recognition {
            text: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        })
    }

    async fn terminate(&self) {
        // Each recognition is its own process; nothing stays resident
        debug!("Tesseract engine released");
    }
}

/// Builds [`TesseractEngine`]s after checking the executable
pub struct TesseractFactory {
    settings: RecognitionSettings,
}

impl TesseractFactory {
    pub fn new(settings: RecognitionSettings) -> Self {
        Self { settings }
    }

    /// Languages installed for the configured executable
    pub async fn list_languages(&self) -> Result<Vec<String>, RecognitionError> {
        let output = self
            .settings
            .command()
            .arg("--list-langs")
            .output()
            .await
            .map_err(|e| RecognitionError::Construction(format!("failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            return Err(RecognitionError::Construction(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    async fn create(&self) -> Result<Box<dyn RecognitionEngine>, RecognitionError> {
        let output = Command::new(&self.settings.executable)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                RecognitionError::Construction(format!(
                    "tesseract not found at {}: {}",
                    self.settings.executable.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(RecognitionError::Construction(format!(
                "tesseract --version exited with {}",
                output.status
            )));
        }

        // Older builds print the version on stderr
        let version = first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| "tesseract (unknown version)".to_string());

        let installed = self.list_languages().await?;
        let missing = missing_languages(&self.settings.languages, &installed);
        if !missing.is_empty() {
            return Err(RecognitionError::Construction(format!(
                "language data not installed: {}",
                missing.join(", ")
            )));
        }

        info!("Using {} with languages {}", version, self.settings.languages);
        Ok(Box::new(TesseractEngine {
            settings: self.settings.clone(),
            version,
        }))
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Parse `--list-langs` output, skipping the header line
fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Requested languages (`jpn+eng`) absent from the installed list
fn missing_languages(requested: &str, installed: &[String]) -> Vec<String> {
    requested
        .split('+')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !installed.iter().any(|i| i == l))
        .map(str::to_string)
        .collect()
}
