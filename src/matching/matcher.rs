//! Tiered fuzzy skill matching
//!
//! Recognized text is matched against every spelling of every label in three
//! tiers:
//! 1. Substring: the spelling occurs verbatim in the text
//! 2. Bigram overlap: shared character pairs, counted as a multiset
//! 3. Monogram overlap: shared characters, counted as a multiset
//!
//! A lower tier is only consulted when no higher tier produced a candidate.
//! Ties resolve by score, then matched spelling length, then vocabulary order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use super::vocabulary::Vocabulary;

/// Label returned when nothing matched
pub const UNKNOWN_SKILL: &str = "unknown";

/// Tier that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Substring,
    Bigram,
    Monogram,
    None,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Substring => write!(f, "substring"),
            MatchMode::Bigram => write!(f, "bigram"),
            MatchMode::Monogram => write!(f, "monogram"),
            MatchMode::None => write!(f, "none"),
        }
    }
}

/// Outcome of matching text against one vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Canonical label, or [`UNKNOWN_SKILL`]
    pub skill: String,
    /// Matched length for substring, overlap count otherwise
    pub score: u32,
    /// Length in characters of the matched spelling
    pub length: u32,
    pub mode: MatchMode,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            skill: UNKNOWN_SKILL.to_string(),
            score: 0,
            length: 0,
            mode: MatchMode::None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.mode == MatchMode::None
    }
}

/// Minimum scores for a match to count as strong in unattended capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchGate {
    pub min_substring: u32,
    pub min_bigram: u32,
    pub min_monogram: u32,
}

impl Default for MatchGate {
    fn default() -> Self {
        Self {
            min_substring: 2,
            min_bigram: 2,
            min_monogram: 3,
        }
    }
}

impl MatchGate {
    pub fn is_strong(&self, result: &MatchResult) -> bool {
        match result.mode {
            MatchMode::Substring => result.score >= self.min_substring,
            MatchMode::Bigram => result.score >= self.min_bigram,
            MatchMode::Monogram => result.score >= self.min_monogram,
            MatchMode::None => false,
        }
    }
}

/// Best (score, length) seen for one tier, first entry wins ties
#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    score: u32,
    length: u32,
}

impl Candidate {
    fn beats(&self, other: &Option<Candidate>) -> bool {
        match other {
            None => true,
            Some(o) => (self.score, self.length) > (o.score, o.length),
        }
    }
}

fn offer(best: &mut Option<Candidate>, candidate: Candidate) {
    if candidate.beats(best) {
        *best = Some(candidate);
    }
}

fn counts<K: Eq + Hash>(items: impl Iterator<Item = K>) -> HashMap<K, u32> {
    let mut table = HashMap::new();
    for item in items {
        *table.entry(item).or_insert(0) += 1;
    }
    table
}

fn bigrams(chars: &[char]) -> impl Iterator<Item = (char, char)> + '_ {
    chars.windows(2).map(|w| (w[0], w[1]))
}

/// Multiset intersection size: each text item is consumed at most once
fn overlap<K: Eq + Hash + Copy>(text: &HashMap<K, u32>, items: impl Iterator<Item = K>) -> u32 {
    let mut remaining = text.clone();
    let mut score = 0;
    for item in items {
        if let Some(n) = remaining.get_mut(&item) {
            if *n > 0 {
                *n -= 1;
                score += 1;
            }
        }
    }
    score
}

/// Match normalized text against a vocabulary
///
/// `text` must already be normalized with
/// [`normalize_text`](super::normalize::normalize_text).
pub fn match_skill(text: &str, vocabulary: &Vocabulary) -> MatchResult {
    let text_chars: Vec<char> = text.chars().collect();
    let text_bigrams = counts(bigrams(&text_chars));
    let text_monograms = counts(text_chars.iter().copied());

    let mut substring: Option<Candidate> = None;
    let mut bigram: Option<Candidate> = None;
    let mut monogram: Option<Candidate> = None;

    for (index, entry) in vocabulary.entries().iter().enumerate() {
        for variant in entry.normalized.iter().filter(|v| !v.is_empty()) {
            let chars: Vec<char> = variant.chars().collect();
            let length = chars.len() as u32;

            if text.contains(variant.as_str()) {
                offer(&mut substring, Candidate { index, score: length, length });
            }

            // Fuzzy tiers are irrelevant once any substring hit exists
            if substring.is_some() {
                continue;
            }

            let score = overlap(&text_bigrams, bigrams(&chars));
            offer(&mut bigram, Candidate { index, score, length });

            let score = overlap(&text_monograms, chars.iter().copied());
            offer(&mut monogram, Candidate { index, score, length });
        }
    }

    let (winner, mode) = match (substring, bigram, monogram) {
        (Some(c), _, _) => (c, MatchMode::Substring),
        (None, Some(c), _) if c.score >= 1 => (c, MatchMode::Bigram),
        (None, _, Some(c)) if c.score >= 1 => (c, MatchMode::Monogram),
        _ => return MatchResult::unknown(),
    };

    MatchResult {
        skill: vocabulary.entries()[winner.index].label().to_string(),
        score: winner.score,
        length: winner.length,
        mode,
    }
}
