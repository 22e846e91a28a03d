use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strsim::{jaro_winkler, normalized_levenshtein};

/// String similarity used by the fuzzy stage of the matcher. A closed set:
/// adding a metric means adding a variant here and an arm in [`Self::score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Token-set ratio: shared tokens are compared against each side's
    /// remainder, so an alias whose tokens all appear in the title scores 1.0.
    #[default]
    TokenSetRatio,
    /// 1 - Levenshtein distance / longer length
    NormalizedLevenshtein,
    JaroWinkler,
}

impl SimilarityMetric {
    /// Similarity in [0, 1] between two free-text strings. Both sides are
    /// reduced with [`fuzzy_key`] first; an empty side scores 0.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let a = fuzzy_key(a);
        let b = fuzzy_key(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        match self {
            SimilarityMetric::TokenSetRatio => token_set_ratio(&a, &b),
            SimilarityMetric::NormalizedLevenshtein => normalized_levenshtein(&a, &b),
            SimilarityMetric::JaroWinkler => jaro_winkler(&a, &b),
        }
    }
}

/// Lowercase, turn punctuation into spaces and collapse whitespace.
pub fn fuzzy_key(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        0.0
    } else {
        normalized_levenshtein(a, b)
    }
}

fn token_set_ratio(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();

    let shared = left.intersection(&right).copied().collect::<Vec<_>>().join(" ");
    let only_left = left.difference(&right).copied().collect::<Vec<_>>().join(" ");
    let only_right = right.difference(&left).copied().collect::<Vec<_>>().join(" ");

    let with_left = join_tokens(&shared, &only_left);
    let with_right = join_tokens(&shared, &only_right);

    ratio(&shared, &with_left)
        .max(ratio(&shared, &with_right))
        .max(ratio(&with_left, &with_right))
}

fn join_tokens(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}
