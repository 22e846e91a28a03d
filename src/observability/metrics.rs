//! Metric names and recording helpers for the listing pipeline.
//!
//! Recording goes through the `metrics` facade. Nothing is exported unless the
//! host process installs a recorder, so the core stays free of I/O.

use std::fmt;

/// Every metric the pipeline records. Avoids magic strings at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Cleaner
    CleanRowsAccepted,
    CleanRowsRejected,
    CleanUnknownHeaders,

    // Matcher
    MatchExact,
    MatchRegex,
    MatchFuzzy,
    MatchNone,
    MatchConfidence,

    // Deduplicator
    DedupGroups,
    DedupSecondaries,

    // Enricher
    EnrichMissingMetadata,

    // Quantization
    QuantizationZeroProfiles,

    // Scorer
    ScoreFinal,

    // Whole run
    PipelineRuns,
    PipelineBatchSize,
    PipelineDuration,
    /// Unix time of the last finished run
    PipelineLastRun,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CleanRowsAccepted => "gpu_clean_rows_accepted_total",
            MetricName::CleanRowsRejected => "gpu_clean_rows_rejected_total",
            MetricName::CleanUnknownHeaders => "gpu_clean_unknown_headers_total",
            MetricName::MatchExact => "gpu_match_exact_total",
            MetricName::MatchRegex => "gpu_match_regex_total",
            MetricName::MatchFuzzy => "gpu_match_fuzzy_total",
            MetricName::MatchNone => "gpu_match_none_total",
            MetricName::MatchConfidence => "gpu_match_confidence",
            MetricName::DedupGroups => "gpu_dedup_groups_total",
            MetricName::DedupSecondaries => "gpu_dedup_secondaries_total",
            MetricName::EnrichMissingMetadata => "gpu_enrich_missing_metadata_total",
            MetricName::QuantizationZeroProfiles => "gpu_quantization_zero_profiles_total",
            MetricName::ScoreFinal => "gpu_score_final",
            MetricName::PipelineRuns => "gpu_pipeline_runs_total",
            MetricName::PipelineBatchSize => "gpu_pipeline_batch_size",
            MetricName::PipelineDuration => "gpu_pipeline_duration_seconds",
            MetricName::PipelineLastRun => "gpu_pipeline_last_run_timestamp_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn emit_counter(name: MetricName, value: u64) {
    if value > 0 {
        ::metrics::counter!(name.as_str()).increment(value);
    }
}

pub fn emit_histogram(name: MetricName, value: f64) {
    ::metrics::histogram!(name.as_str()).record(value);
}

pub fn emit_gauge(name: MetricName, value: f64) {
    ::metrics::gauge!(name.as_str()).set(value);
}
