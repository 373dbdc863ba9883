//! Application Configuration
//!
//! User settings stored in TOML format. Every section falls back to its
//! defaults, so a partial file only needs the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::auto_capture::AutoCaptureSettings;
use crate::capture::CaptureSettings;
use crate::matching::{MatchingSettings, WaitConfig};
use crate::vision::{PreprocessSettings, RecognitionSettings};

/// Config file name inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Region capture settings
    pub capture: CaptureSettings,
    /// Binarization settings
    pub preprocess: PreprocessSettings,
    /// Recognition engine settings
    pub recognition: RecognitionSettings,
    /// Loading placeholder heuristic
    pub wait: WaitConfig,
    /// Vocabulary and confidence gate
    pub matching: MatchingSettings,
    /// Auto-capture loop settings
    pub auto_capture: AutoCaptureSettings,
}

/// Default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Load configuration, or the defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config(path)
    } else {
        info!("No config at {:?}, using defaults", path);
        Ok(AppConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_capture::AutoCaptureSpeed;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check capture defaults
        assert_eq!(config.capture.max_width, 720);
        assert!((config.capture.min_region_fraction - 0.05).abs() < 1e-6);

        // Check preprocess defaults
        assert_eq!(config.preprocess.threshold, 160);
        assert!(config.preprocess.use_gpu);

        // Check recognition defaults
        assert_eq!(config.recognition.languages, "jpn+eng");
        assert_eq!(config.recognition.page_segmentation_mode, 6);

        // Check heuristic defaults
        assert_eq!(config.wait.min_placeholder_chars, 2);
        assert_eq!(config.wait.short_text_max, 8);
        assert_eq!(config.matching.gate.min_monogram, 3);
        assert_eq!(config.auto_capture.speed, AutoCaptureSpeed::Normal);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.capture.max_width, parsed.capture.max_width);
        assert_eq!(config.wait.tokens, parsed.wait.tokens);
        assert_eq!(config.wait.placeholder_chars, parsed.wait.placeholder_chars);
        assert_eq!(config.auto_capture.speed, parsed.auto_capture.speed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
[preprocess]
threshold = 128

[auto_capture]
speed = "fast"

[matching.gate]
min_bigram = 3
"#,
        )
        .unwrap();

        assert_eq!(parsed.preprocess.threshold, 128);
        assert!(parsed.preprocess.use_gpu);
        assert_eq!(parsed.auto_capture.speed, AutoCaptureSpeed::Fast);
        assert_eq!(parsed.matching.gate.min_bigram, 3);
        assert_eq!(parsed.matching.gate.min_substring, 2);
        assert_eq!(parsed.capture.max_width, 720);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.capture.max_width = 480;
        config.matching.vocabulary_path = Some(PathBuf::from("skills.toml"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.capture.max_width, 480);
        assert_eq!(loaded.matching.vocabulary_path, Some(PathBuf::from("skills.toml")));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.preprocess.threshold, 160);
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
