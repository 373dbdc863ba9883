//! Text Matching Layer
//!
//! Turns raw recognized text into vocabulary labels:
//! - [`normalize_text`] canonicalizes text before any comparison
//! - [`WaitDetector`] filters out loading placeholders
//! - [`match_skill`] picks the best label with a tiered fuzzy match

pub mod matcher;
pub mod normalize;
pub mod vocabulary;
pub mod wait;

pub use matcher::{match_skill, MatchGate, MatchMode, MatchResult, UNKNOWN_SKILL};
pub use normalize::normalize_text;
pub use vocabulary::{LabelSpec, Vocabularies, Vocabulary, VocabularyEntry};
pub use wait::{WaitConfig, WaitDetector};

use serde::{Deserialize, Serialize};

/// Matching settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// TOML file with the series and group vocabularies
    pub vocabulary_path: Option<std::path::PathBuf>,
    /// Confidence gate for unattended capture
    pub gate: MatchGate,
}

/// Series and group matches for one recognized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPair {
    pub series: MatchResult,
    pub group: MatchResult,
}

impl SkillPair {
    /// Match raw text against both vocabularies
    pub fn from_raw(raw: &str, vocabularies: &Vocabularies) -> Self {
        let text = normalize_text(raw);
        Self {
            series: match_skill(&text, &vocabularies.series),
            group: match_skill(&text, &vocabularies.group),
        }
    }

    /// Whether both matches pass the gate
    pub fn is_strong(&self, gate: &MatchGate) -> bool {
        gate.is_strong(&self.series) && gate.is_strong(&self.group)
    }
}
