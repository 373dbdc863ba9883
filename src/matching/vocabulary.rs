//! Closed label vocabularies
//!
//! A vocabulary is an ordered list of canonical labels, each with optional
//! alternate spellings (translations, kana readings). Order matters: it is
//! the final tie-break of the matcher.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::normalize::normalize_text;

/// One label as written in a vocabulary file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

impl LabelSpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            variants: Vec::new(),
        }
    }

    pub fn with_variants<I, S>(mut self, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variants.extend(variants.into_iter().map(Into::into));
        self
    }
}

/// A label with its normalized spellings, canonical form first
#[derive(Debug, Clone)]
pub struct VocabularyEntry {
    pub spec: LabelSpec,
    /// Normalized canonical label followed by normalized variants
    pub normalized: Vec<String>,
}

impl VocabularyEntry {
    fn new(spec: LabelSpec) -> Self {
        let normalized = std::iter::once(&spec.label)
            .chain(spec.variants.iter())
            .map(|s| normalize_text(s))
            .collect();
        Self { spec, normalized }
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }
}

/// Ordered labels with precomputed normalized spellings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<LabelSpec>", into = "Vec<LabelSpec>")]
pub struct Vocabulary {
    entries: Vec<VocabularyEntry>,
}

impl From<Vec<LabelSpec>> for Vocabulary {
    fn from(specs: Vec<LabelSpec>) -> Self {
        Self {
            entries: specs.into_iter().map(VocabularyEntry::new).collect(),
        }
    }
}

impl From<Vocabulary> for Vec<LabelSpec> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.entries.into_iter().map(|e| e.spec).collect()
    }
}

impl Vocabulary {
    /// Vocabulary of plain labels without variants
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        labels
            .into_iter()
            .map(LabelSpec::new)
            .collect::<Vec<_>>()
            .into()
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `label` is one of the canonical labels
    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label() == label)
    }

    /// Alternate spellings known for a label
    pub fn variants(&self, label: &str) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.label() == label)
            .map(|e| e.spec.variants.as_slice())
            .unwrap_or(&[])
    }
}

/// The two parallel vocabularies matched against every recognition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabularies {
    pub series: Vocabulary,
    pub group: Vocabulary,
}

impl Vocabularies {
    pub fn new(series: Vocabulary, group: Vocabulary) -> Self {
        Self { series, group }
    }

    /// Load both vocabularies from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary file {}", path.display()))?;
        let vocabularies: Vocabularies = toml::from_str(&content)
            .with_context(|| format!("Failed to parse vocabulary file {}", path.display()))?;
        info!(
            "Loaded {} series and {} group labels from {:?}",
            vocabularies.series.len(),
            vocabularies.group.len(),
            path
        );
        Ok(vocabularies)
    }

    /// Write both vocabularies as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write vocabulary file {}", path.display()))?;
        Ok(())
    }
}
