pub mod similarity;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::processing::clean::RawListing;
use crate::registry::{normalize_key, ModelRegistry};

pub use similarity::{fuzzy_key, SimilarityMetric};

/// Default minimum fuzzy similarity; a match must score strictly above it.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Which matching rule resolved a title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Regex,
    Fuzzy,
    None,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchType::Exact => "exact",
            MatchType::Regex => "regex",
            MatchType::Fuzzy => "fuzzy",
            MatchType::None => "none",
        };
        f.write_str(name)
    }
}

/// The outcome of matching one title against the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleMatch {
    /// `None` means unmatched
    pub canonical_model: Option<String>,
    pub match_type: MatchType,
    /// Certainty of the assignment in [0, 1]
    pub confidence: f64,
    /// The alias or pattern that fired
    pub matched_on: Option<String>,
}

impl TitleMatch {
    fn unmatched() -> Self {
        Self {
            canonical_model: None,
            match_type: MatchType::None,
            confidence: 0.0,
            matched_on: None,
        }
    }
}

/// A cleaned listing resolved to a canonical hardware identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub listing: RawListing,
    pub canonical_model: Option<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub matched_on: Option<String>,
}

impl NormalizedListing {
    pub fn new(listing: RawListing, result: TitleMatch) -> Self {
        Self {
            listing,
            canonical_model: result.canonical_model,
            match_type: result.match_type,
            confidence: result.confidence,
            matched_on: result.matched_on,
        }
    }

    /// Unmatched listings are kept and surfaced for manual triage.
    pub fn needs_review(&self) -> bool {
        self.match_type == MatchType::None
    }
}

/// Configuration for the matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub similarity_threshold: f64,
    pub metric: SimilarityMetric,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            metric: SimilarityMetric::default(),
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.similarity_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::InvalidThreshold {
                name: "matcher.similarity_threshold",
                value: t,
                expected: "expected a value in [0, 1]",
            });
        }
        Ok(())
    }
}

/// Match-type histogram for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub exact: usize,
    pub regex: usize,
    pub fuzzy: usize,
    pub none: usize,
}

impl MatchSummary {
    pub fn record(&mut self, match_type: MatchType) {
        match match_type {
            MatchType::Exact => self.exact += 1,
            MatchType::Regex => self.regex += 1,
            MatchType::Fuzzy => self.fuzzy += 1,
            MatchType::None => self.none += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.exact + self.regex + self.fuzzy + self.none
    }
}

/// Resolves free-text titles to canonical models.
///
/// Rules run in strict precedence and the first that fires wins: exact alias,
/// then regex patterns in registry order, then fuzzy similarity over every
/// alias. Precedence is absolute; a fuzzy score never overrides an earlier rule.
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    config: MatcherConfig,
}

impl TitleMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Match a single title. Pure function of (title, registry, thresholds).
    pub fn match_title<R: ModelRegistry + ?Sized>(&self, title: &str, registry: &R) -> TitleMatch {
        let key = normalize_key(title);
        if key.is_empty() {
            return TitleMatch::unmatched();
        }

        if let Some(hit) = registry.lookup_by_alias(&key) {
            return TitleMatch {
                canonical_model: Some(hit.canonical_name.clone()),
                match_type: MatchType::Exact,
                confidence: 1.0,
                matched_on: Some(hit.alias.clone()),
            };
        }

        let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if let Some(pattern) = registry.iterate_patterns().find(|p| p.regex.is_match(&collapsed)) {
            return TitleMatch {
                canonical_model: Some(pattern.canonical_name.clone()),
                match_type: MatchType::Regex,
                confidence: pattern.confidence,
                matched_on: Some(pattern.source.clone()),
            };
        }

        // Strict '>' keeps the first alias in registry order on ties.
        let mut best: Option<(f64, &crate::registry::RegisteredAlias)> = None;
        for alias in registry.iterate_aliases() {
            let score = self.config.metric.score(&collapsed, &alias.alias);
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, alias));
            }
        }

        match best {
            Some((score, alias)) if score > self.config.similarity_threshold => TitleMatch {
                canonical_model: Some(alias.canonical_name.clone()),
                match_type: MatchType::Fuzzy,
                confidence: score.clamp(0.0, 1.0),
                matched_on: Some(alias.alias.clone()),
            },
            _ => TitleMatch::unmatched(),
        }
    }

    /// Normalize a batch, preserving order and row count.
    pub fn normalize<R: ModelRegistry + ?Sized>(
        &self,
        listings: Vec<RawListing>,
        registry: &R,
    ) -> (Vec<NormalizedListing>, MatchSummary) {
        let mut summary = MatchSummary::default();
        let normalized: Vec<NormalizedListing> = listings
            .into_iter()
            .map(|listing| {
                let result = self.match_title(&listing.title, registry);
                debug!(
                    row = listing.row,
                    title = %listing.title,
                    match_type = %result.match_type,
                    canonical = ?result.canonical_model,
                    confidence = result.confidence,
                    "Matched title"
                );
                summary.record(result.match_type);
                NormalizedListing::new(listing, result)
            })
            .collect();

        info!(
            "Matcher resolved {} listings: {} exact, {} regex, {} fuzzy, {} unmatched",
            summary.total(),
            summary.exact,
            summary.regex,
            summary.fuzzy,
            summary.none
        );
        (normalized, summary)
    }
}
