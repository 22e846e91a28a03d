use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::observability::{emit_counter, emit_gauge, emit_histogram, MetricName};
use crate::pipeline::processing::clean::{CleanReport, Cleaner, RawRow};
use crate::pipeline::processing::dedup::{DedupSummary, DedupedListing, Deduplicator};
use crate::pipeline::processing::enrich::{EnrichSummary, Enricher};
use crate::pipeline::processing::normalize::{MatchSummary, TitleMatcher};
use crate::pipeline::processing::quantize::{QuantizationCalculator, QuantizationSummary, QuantizedListing};
use crate::pipeline::processing::score::{ScoreSummary, ScoredListing, Scorer};
use crate::registry::ModelRegistry;

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Capacity formula used, when quantization ran
    pub quantization_formula: Option<String>,
    pub clean: CleanReport,
    pub matching: MatchSummary,
    /// `None` when deduplication is disabled
    pub dedup: Option<DedupSummary>,
    pub enrich: EnrichSummary,
    /// `None` when quantization is disabled
    pub quantization: Option<QuantizationSummary>,
    pub score: ScoreSummary,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub listings: Vec<ScoredListing>,
    pub report: PipelineReport,
}

/// Runs the stages in order over one batch:
/// clean, normalize, dedup (optional), enrich, quantize (optional), score.
///
/// All stages are built and validated up front, so a bad configuration fails
/// before any row is read.
#[derive(Debug, Clone)]
pub struct Pipeline {
    cleaner: Cleaner,
    matcher: TitleMatcher,
    deduplicator: Option<Deduplicator>,
    enricher: Enricher,
    quantizer: Option<QuantizationCalculator>,
    scorer: Scorer,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let cleaner = Cleaner::new(&config.cleaner)?;
        let matcher = TitleMatcher::new(config.matcher.clone())?;
        // Disabled stages are validated too.
        let deduplicator = Deduplicator::new(config.dedup.clone())?;
        let quantizer = QuantizationCalculator::new(config.quantization.clone())?;
        let scorer = Scorer::new(config.scoring.clone())?;

        Ok(Self {
            cleaner,
            matcher,
            deduplicator: config.dedup.enabled.then_some(deduplicator),
            enricher: Enricher::new(),
            quantizer: config.quantization.enabled.then_some(quantizer),
            scorer,
        })
    }

    pub fn matcher(&self) -> &TitleMatcher {
        &self.matcher
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    pub fn run<R: ModelRegistry + ?Sized>(&self, rows: &[RawRow], registry: &R) -> PipelineOutput {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting pipeline run {} over {} rows", run_id, rows.len());

        let (cleaned, clean) = self.cleaner.clean(rows);

        let (normalized, matching) = self.matcher.normalize(cleaned, registry);
        for listing in normalized.iter().filter(|l| l.needs_review()) {
            warn!(row = listing.listing.row, title = %listing.listing.title, "No canonical model; flagged for review");
        }

        let (deduped, dedup) = match &self.deduplicator {
            Some(deduplicator) => {
                let (deduped, summary) = deduplicator.deduplicate(normalized);
                (deduped, Some(summary))
            }
            None => (normalized.into_iter().map(DedupedListing::undeduplicated).collect(), None),
        };

        let (enriched, enrich) = self.enricher.enrich(deduped, registry);

        let (quantized, quantization) = match &self.quantizer {
            Some(quantizer) => {
                let (quantized, summary) = quantizer.quantize(enriched);
                (quantized, Some(summary))
            }
            None => (enriched.into_iter().map(QuantizedListing::unquantized).collect(), None),
        };

        let (listings, score) = self.scorer.score(quantized);

        let report = PipelineReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            quantization_formula: self.quantizer.as_ref().map(|q| q.formula_version().to_string()),
            clean,
            matching,
            dedup,
            enrich,
            quantization,
            score,
        };
        record_metrics(&report, &listings, clock.elapsed().as_secs_f64());

        info!(
            "Pipeline run {} finished: {} of {} rows scored in {:.3}s",
            run_id,
            listings.len(),
            rows.len(),
            clock.elapsed().as_secs_f64()
        );
        PipelineOutput { listings, report }
    }
}

fn record_metrics(report: &PipelineReport, listings: &[ScoredListing], duration_secs: f64) {
    emit_counter(MetricName::PipelineRuns, 1);
    emit_histogram(MetricName::PipelineBatchSize, report.clean.input_rows as f64);
    emit_histogram(MetricName::PipelineDuration, duration_secs);
    emit_gauge(MetricName::PipelineLastRun, report.finished_at.timestamp() as f64);

    emit_counter(MetricName::CleanRowsAccepted, report.clean.accepted as u64);
    emit_counter(MetricName::CleanRowsRejected, report.clean.rejected() as u64);
    emit_counter(MetricName::CleanUnknownHeaders, report.clean.unknown_headers.len() as u64);

    emit_counter(MetricName::MatchExact, report.matching.exact as u64);
    emit_counter(MetricName::MatchRegex, report.matching.regex as u64);
    emit_counter(MetricName::MatchFuzzy, report.matching.fuzzy as u64);
    emit_counter(MetricName::MatchNone, report.matching.none as u64);

    if let Some(dedup) = &report.dedup {
        emit_counter(MetricName::DedupGroups, dedup.groups as u64);
        emit_counter(MetricName::DedupSecondaries, dedup.secondaries as u64);
    }
    emit_counter(MetricName::EnrichMissingMetadata, report.enrich.missing_metadata as u64);
    if let Some(quantization) = &report.quantization {
        emit_counter(MetricName::QuantizationZeroProfiles, quantization.zero_profiles as u64);
    }

    for listing in listings {
        emit_histogram(
            MetricName::MatchConfidence,
            listing.quantized.enriched.deduped.normalized.confidence,
        );
        emit_histogram(MetricName::ScoreFinal, listing.final_score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::MatchType;
    use crate::registry::{CanonicalModelEntry, CanonicalRegistry, GpuSpecs};

    fn registry() -> CanonicalRegistry {
        CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("RTX_6000_ADA")
                .with_aliases(["RTX 6000 Ada Generation"])
                .with_specs(GpuSpecs {
                    vram_gb: 48.0,
                    tdp_watts: 300.0,
                    mig_level: 0,
                    nvlink: false,
                }),
            CanonicalModelEntry::new("A2").with_pattern("^NVIDIA A2$"),
        ])
        .unwrap()
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_run_produces_one_listing_per_accepted_row() {
        let pipeline = Pipeline::new(&PipelineConfig::default()).unwrap();
        let rows = vec![
            row(&[("Title", "RTX 6000 Ada Generation"), ("Price", "$3,205.00")]),
            row(&[("Title", "RTX 6000 Ada Generation"), ("Price", "$3,199.00")]),
            row(&[("Title", "NVIDIA A2"), ("Price", "900")]),
            row(&[("Price", "100")]),
        ];

        let output = pipeline.run(&rows, &registry());
        assert_eq!(output.listings.len(), 3);
        assert_eq!(output.report.clean.rejected(), 1);
        assert_eq!(output.report.matching.exact, 2);
        assert_eq!(output.report.matching.regex, 1);
        assert_eq!(output.report.dedup.unwrap().secondaries, 1);
        assert_eq!(output.report.quantization_formula.as_deref(), Some("quant-v1"));

        let a2 = &output.listings[2].quantized.enriched;
        assert_eq!(a2.deduped.normalized.match_type, MatchType::Regex);
        assert!(a2.missing_metadata);
        assert!(output.listings.iter().all(|l| (0.0..=100.0).contains(&l.final_score)));
    }

    #[test]
    fn test_disabled_stages_leave_fields_empty() {
        let mut config = PipelineConfig::default();
        config.dedup.enabled = false;
        config.quantization.enabled = false;
        let pipeline = Pipeline::new(&config).unwrap();

        let rows = vec![row(&[("title", "RTX 6000 Ada Generation"), ("price", "3199")])];
        let output = pipeline.run(&rows, &registry());

        let listing = &output.listings[0];
        assert!(listing.quantized.quantization.is_none());
        assert!(listing.quantized.enriched.deduped.dedup.is_none());
        assert_eq!(listing.quantization_score, 0.0);
        assert!(output.report.dedup.is_none());
        assert!(output.report.quantization_formula.is_none());
    }

    #[test]
    fn test_invalid_disabled_stage_still_fails_construction() {
        let mut config = PipelineConfig::default();
        config.quantization.enabled = false;
        config.quantization.bits_overhead = -1.0;
        assert!(Pipeline::new(&config).is_err());
    }
}
