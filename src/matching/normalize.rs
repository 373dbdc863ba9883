//! Text canonicalization for comparison
//!
//! Recognized text and vocabulary strings go through the same function so
//! that width, case and punctuation noise never affect a match.

use unicode_normalization::UnicodeNormalization;

/// Full-width punctuation, quotes and brackets that survive NFKC
const STRIPPED: &[char] = &[
    '。', '、', '・', '「', '」', '『', '』', '【', '】', '〈', '〉', '《', '》', '〔', '〕', '〖',
    '〗', '〘', '〙', '〚', '〛', '“', '”', '‘', '’', '„', '‟', '«', '»', '…', '‥', '〝', '〞',
    '〟', '｡', '､', '･', '｢', '｣',
];

fn is_stripped(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation() || STRIPPED.contains(&c)
}

/// Canonicalize text: NFKC, lowercase, drop whitespace and punctuation
///
/// Pure and total; `normalize_text(normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text.nfkc().flat_map(char::to_lowercase).collect();
    // Removing characters can expose new compositions
    folded.chars().filter(|c| !is_stripped(*c)).nfkc().collect()
}
