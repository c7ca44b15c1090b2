//! Text normalization and token-set similarity for incident descriptions.
//!
//! The same pipeline is applied to both sides of every comparison, so
//! "A1 closure!" and "a1   CLOSURE" produce identical token sets.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Tokens must be longer than this many characters to count.
pub const MIN_TOKEN_CHARS: usize = 2;

/// Anything that is not a letter, digit or whitespace.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex"));

/// Runs of whitespace.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalizes free text for comparison.
///
/// The pipeline:
/// 1. Lowercase
/// 2. Strip punctuation
/// 3. Collapse whitespace
/// 4. Trim
#[must_use]
pub fn normalize(input: &str) -> String {
    let lower = input.to_lowercase();
    let no_punct = PUNCTUATION_RE.replace_all(&lower, "");
    WHITESPACE_RE.replace_all(&no_punct, " ").trim().to_string()
}

/// Normalized tokens longer than [`MIN_TOKEN_CHARS`] characters.
#[must_use]
pub fn tokens(input: &str) -> BTreeSet<String> {
    normalize(input)
        .split(' ')
        .filter(|t| t.chars().count() > MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`. Two empty sets share nothing and score `0.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity of the token sets of two texts.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}
