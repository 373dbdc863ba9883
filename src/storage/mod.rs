//! Storage Layer
//!
//! The record-store port the capture loop writes to, and the application
//! directories used for configuration and vocabulary files.

pub mod records;

pub use records::{MemoryRecordStore, Record, RecordError, RecordRef, RecordStore};

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "skillscan", "SkillScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine application directories"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
