use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::processing::normalize::NormalizedListing;

/// Group id prefix for listings without a canonical model
pub const UNMATCHED_GROUP: &str = "unmatched";

/// Role of a listing within its duplicate group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupRole {
    Primary,
    Secondary,
}

impl fmt::Display for DedupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupRole::Primary => f.write_str("primary"),
            DedupRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Group membership of one listing, decided once and never revisited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupAssignment {
    /// `<canonical model or "unmatched">#<row of the primary>`
    pub group_id: String,
    pub role: DedupRole,
    pub primary_row: usize,
    pub group_size: usize,
}

/// A normalized listing with its dedup assignment, if the stage ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedListing {
    pub normalized: NormalizedListing,
    pub dedup: Option<DedupAssignment>,
}

impl DedupedListing {
    /// Wrap a listing when deduplication is disabled.
    pub fn undeduplicated(normalized: NormalizedListing) -> Self {
        Self {
            normalized,
            dedup: None,
        }
    }

    /// True unless the listing was marked as a secondary copy.
    pub fn is_primary(&self) -> bool {
        self.dedup
            .as_ref()
            .map_or(true, |d| d.role == DedupRole::Primary)
    }
}

/// Configuration for duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Maximum relative price difference, `|a - b| / min(a, b)`, exclusive
    pub price_tolerance: f64,
    /// Listings further apart in age than this are different lots
    pub max_listing_age_gap_days: f64,
    /// Require equal sellers when both are known
    pub match_seller: bool,
    /// Require equal regions when both are known
    pub match_region: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            price_tolerance: 0.05,
            max_listing_age_gap_days: 14.0,
            match_seller: true,
            match_region: true,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.price_tolerance.is_finite() || self.price_tolerance < 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "dedup.price_tolerance",
                value: self.price_tolerance,
                expected: "expected a finite, non-negative fraction",
            });
        }
        if !self.max_listing_age_gap_days.is_finite() || self.max_listing_age_gap_days < 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "dedup.max_listing_age_gap_days",
                value: self.max_listing_age_gap_days,
                expected: "expected a finite, non-negative number of days",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupSummary {
    pub groups: usize,
    pub primaries: usize,
    pub secondaries: usize,
    /// Matched listings without a usable price, kept as singleton primaries
    pub unpriced_singletons: usize,
    /// Listings without a canonical model, never deduplicated
    pub unmatched_singletons: usize,
}

/// Detects listings that represent the same physical inventory lot.
///
/// Listings are partitioned by canonical model in a single pass, then
/// clustered per partition: members are visited cheapest first (then
/// freshest, then input order) and each joins the first cluster whose seed it
/// is compatible with, otherwise it seeds a new one. The seed is the primary.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn deduplicate(&self, listings: Vec<NormalizedListing>) -> (Vec<DedupedListing>, DedupSummary) {
        let mut summary = DedupSummary::default();
        let mut assignments: Vec<Option<DedupAssignment>> = vec![None; listings.len()];
        let mut partitions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (idx, item) in listings.iter().enumerate() {
            match (&item.canonical_model, item.listing.price) {
                (Some(model), Some(_)) => partitions.entry(model.as_str()).or_default().push(idx),
                (Some(model), None) => {
                    summary.unpriced_singletons += 1;
                    assignments[idx] = Some(singleton(model, item.listing.row));
                }
                (None, _) => {
                    summary.unmatched_singletons += 1;
                    assignments[idx] = Some(singleton(UNMATCHED_GROUP, item.listing.row));
                }
            }
        }

        for (model, mut members) in partitions {
            members.sort_by(|&a, &b| primary_order(&listings[a], &listings[b]).then(a.cmp(&b)));

            let mut clusters: Vec<Vec<usize>> = Vec::new();
            for idx in members {
                let home = clusters
                    .iter_mut()
                    .find(|cluster| self.is_same_lot(&listings[cluster[0]], &listings[idx]));
                match home {
                    Some(cluster) => cluster.push(idx),
                    None => clusters.push(vec![idx]),
                }
            }

            for cluster in clusters {
                let primary_row = listings[cluster[0]].listing.row;
                let group_id = format!("{}#{}", model, primary_row);
                debug!(group = %group_id, size = cluster.len(), "Formed dedup group");
                for (position, &idx) in cluster.iter().enumerate() {
                    assignments[idx] = Some(DedupAssignment {
                        group_id: group_id.clone(),
                        role: if position == 0 { DedupRole::Primary } else { DedupRole::Secondary },
                        primary_row,
                        group_size: cluster.len(),
                    });
                }
            }
        }

        let deduped: Vec<DedupedListing> = listings
            .into_iter()
            .zip(assignments)
            .map(|(normalized, dedup)| DedupedListing { normalized, dedup })
            .collect();

        for item in &deduped {
            match item.dedup.as_ref().map(|d| d.role) {
                Some(DedupRole::Primary) => summary.primaries += 1,
                Some(DedupRole::Secondary) => summary.secondaries += 1,
                None => {}
            }
        }
        summary.groups = summary.primaries;

        info!(
            "Deduplicator formed {} groups: {} secondaries, {} unpriced and {} unmatched singletons",
            summary.groups, summary.secondaries, summary.unpriced_singletons, summary.unmatched_singletons
        );
        (deduped, summary)
    }

    /// Whether `candidate` belongs to the lot seeded by `seed`.
    fn is_same_lot(&self, seed: &NormalizedListing, candidate: &NormalizedListing) -> bool {
        let (Some(a), Some(b)) = (seed.listing.price, candidate.listing.price) else {
            return false;
        };
        if relative_price_difference(a, b) >= self.config.price_tolerance {
            return false;
        }
        if self.config.match_seller && !compatible_text(&seed.listing.seller, &candidate.listing.seller) {
            return false;
        }
        if self.config.match_region && !compatible_text(&seed.listing.region, &candidate.listing.region) {
            return false;
        }
        match (seed.listing.listing_age_days, candidate.listing.listing_age_days) {
            (Some(x), Some(y)) => (x - y).abs() <= self.config.max_listing_age_gap_days,
            _ => true,
        }
    }
}

/// `|a - b| / min(a, b)` for positive prices.
pub fn relative_price_difference(a: f64, b: f64) -> f64 {
    let low = a.min(b);
    if low <= 0.0 {
        return f64::INFINITY;
    }
    (a - b).abs() / low
}

fn compatible_text(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => true,
    }
}

/// Lowest price, then smallest listing age (unknown last), then input row.
fn primary_order(a: &NormalizedListing, b: &NormalizedListing) -> Ordering {
    let price = |l: &NormalizedListing| l.listing.price.unwrap_or(f64::INFINITY);
    let age = |l: &NormalizedListing| l.listing.listing_age_days.unwrap_or(f64::INFINITY);
    price(a)
        .total_cmp(&price(b))
        .then(age(a).total_cmp(&age(b)))
        .then(a.listing.row.cmp(&b.listing.row))
}

fn singleton(group: &str, row: usize) -> DedupAssignment {
    DedupAssignment {
        group_id: format!("{}#{}", group, row),
        role: DedupRole::Primary,
        primary_row: row,
        group_size: 1,
    }
}
