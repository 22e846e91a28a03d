use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pipeline::processing::dedup::DedupedListing;
use crate::registry::{GpuSpecs, ModelRegistry};

/// A deduplicated listing with hardware metadata attached from the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedListing {
    /// The listing as it left deduplication
    pub deduped: DedupedListing,
    /// Hardware specs of the canonical model, when the registry has them
    pub specs: Option<GpuSpecs>,
    /// Set when the listing is unmatched or the model carries no specs
    pub missing_metadata: bool,
    /// Asking price divided by VRAM, when both are known
    pub price_per_vram_gb: Option<f64>,
}

impl EnrichedListing {
    pub fn canonical_model(&self) -> Option<&str> {
        self.deduped.normalized.canonical_model.as_deref()
    }

    pub fn vram_gb(&self) -> Option<f64> {
        self.specs.map(|s| s.vram_gb)
    }

    pub fn price(&self) -> Option<f64> {
        self.deduped.normalized.listing.price
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichSummary {
    pub enriched: usize,
    pub missing_metadata: usize,
}

/// Attaches VRAM, MIG, NVLink and TDP from the registry.
/// Enrichment never drops a listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enricher;

impl Enricher {
    pub fn new() -> Self {
        Self
    }

    pub fn enrich_one<R: ModelRegistry + ?Sized>(&self, deduped: DedupedListing, registry: &R) -> EnrichedListing {
        let specs = deduped
            .normalized
            .canonical_model
            .as_deref()
            .and_then(|model| registry.lookup_specs(model))
            .copied();

        if specs.is_none() {
            debug!(
                row = deduped.normalized.listing.row,
                model = ?deduped.normalized.canonical_model,
                "No hardware metadata for listing"
            );
        }

        let price_per_vram_gb = match (deduped.normalized.listing.price, specs) {
            (Some(price), Some(s)) if s.vram_gb > 0.0 => Some(price / s.vram_gb),
            _ => None,
        };

        EnrichedListing {
            missing_metadata: specs.is_none(),
            deduped,
            specs,
            price_per_vram_gb,
        }
    }

    pub fn enrich<R: ModelRegistry + ?Sized>(
        &self,
        listings: Vec<DedupedListing>,
        registry: &R,
    ) -> (Vec<EnrichedListing>, EnrichSummary) {
        let enriched: Vec<EnrichedListing> = listings
            .into_iter()
            .map(|l| self.enrich_one(l, registry))
            .collect();

        let summary = EnrichSummary {
            enriched: enriched.len(),
            missing_metadata: enriched.iter().filter(|l| l.missing_metadata).count(),
        };
        info!(
            "Enriched {} listings, {} without hardware metadata",
            summary.enriched, summary.missing_metadata
        );
        (enriched, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::clean::RawListing;
    use crate::pipeline::processing::normalize::{MatchType, NormalizedListing};
    use crate::registry::{CanonicalModelEntry, CanonicalRegistry};

    fn registry() -> CanonicalRegistry {
        CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("A100_PCIE_80GB").with_specs(GpuSpecs {
                vram_gb: 80.0,
                tdp_watts: 300.0,
                mig_level: 7,
                nvlink: true,
            }),
            CanonicalModelEntry::new("UNKNOWN_SKU"),
        ])
        .unwrap()
    }

    fn deduped(model: Option<&str>, price: Option<f64>) -> DedupedListing {
        DedupedListing::undeduplicated(NormalizedListing {
            listing: RawListing {
                row: 0,
                title: "card".into(),
                price,
                quantity: 1,
                seller: None,
                region: None,
                listing_age_days: None,
                source_url: None,
                source_type: None,
                bulk_notes: None,
            },
            canonical_model: model.map(str::to_string),
            match_type: if model.is_some() { MatchType::Exact } else { MatchType::None },
            confidence: if model.is_some() { 1.0 } else { 0.0 },
            matched_on: None,
        })
    }

    #[test]
    fn test_attaches_specs_and_price_per_gb() {
        let out = Enricher::new().enrich_one(deduped(Some("A100_PCIE_80GB"), Some(8000.0)), &registry());
        assert!(!out.missing_metadata);
        assert_eq!(out.vram_gb(), Some(80.0));
        assert_eq!(out.specs.unwrap().mig_level, 7);
        assert_eq!(out.price_per_vram_gb, Some(100.0));
    }

    #[test]
    fn test_model_without_specs_is_flagged_not_dropped() {
        let (out, summary) = Enricher::new().enrich(
            vec![deduped(Some("UNKNOWN_SKU"), Some(1000.0)), deduped(None, Some(50.0))],
            &registry(),
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|l| l.missing_metadata && l.specs.is_none()));
        assert!(out.iter().all(|l| l.price_per_vram_gb.is_none()));
        assert_eq!(summary.missing_metadata, 2);
    }

    #[test]
    fn test_unpriced_listing_keeps_specs() {
        let out = Enricher::new().enrich_one(deduped(Some("A100_PCIE_80GB"), None), &registry());
        assert!(out.specs.is_some());
        assert_eq!(out.price_per_vram_gb, None);
    }
}
