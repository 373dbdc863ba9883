//! Loading-placeholder detection
//!
//! While the game is still loading a result it shows blanked glyphs that OCR
//! reads as question marks (or the digit `2`). Text classified as waiting
//! must never be matched.

use serde::{Deserialize, Serialize};

/// Heuristic thresholds. Empirically tuned against one placeholder glyph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Literal placeholder tokens; whitespace is ignored when comparing
    pub tokens: Vec<String>,
    /// Characters that count as placeholder-like
    pub placeholder_chars: Vec<char>,
    /// Fewer placeholder-like characters than this is never waiting
    pub min_placeholder_chars: usize,
    /// Minimum consecutive run for the short-text rule
    pub min_run: usize,
    /// Longest compacted text the short-text rule applies to
    pub short_text_max: usize,
    /// Placeholder ratio at or above which text is waiting
    pub min_ratio: f32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            tokens: vec!["?????".to_string(), "？？？？？".to_string()],
            placeholder_chars: vec!['?', '？', '2'],
            min_placeholder_chars: 2,
            min_run: 2,
            short_text_max: 8,
            min_ratio: 0.3,
        }
    }
}

/// Classifies raw recognized text as placeholder or content
#[derive(Debug, Clone)]
pub struct WaitDetector {
    config: WaitConfig,
    tokens: Vec<String>,
}

impl Default for WaitDetector {
    fn default() -> Self {
        Self::new(WaitConfig::default())
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

impl WaitDetector {
    pub fn new(config: WaitConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| compact(t))
            .filter(|t| !t.is_empty())
            .collect();
        Self { config, tokens }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    fn is_placeholder(&self, c: char) -> bool {
        self.config.placeholder_chars.contains(&c)
    }

    /// Whether the raw text is a loading placeholder
    pub fn is_waiting(&self, raw: &str) -> bool {
        let text = compact(raw);

        if self.tokens.iter().any(|t| text.contains(t.as_str())) {
            return true;
        }

        let mut count = 0usize;
        let mut run = 0usize;
        let mut longest_run = 0usize;
        let mut len = 0usize;
        for c in text.chars() {
            len += 1;
            if self.is_placeholder(c) {
                count += 1;
                run += 1;
                longest_run = longest_run.max(run);
            } else {
                run = 0;
            }
        }

        if count < self.config.min_placeholder_chars {
            return false;
        }

        if longest_run >= self.config.min_run && len <= self.config.short_text_max {
            return true;
        }

        count as f32 / len as f32 >= self.config.min_ratio
    }
}
