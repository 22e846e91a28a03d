use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::processing::quantize::{QuantizationProfile, QuantizedListing};

const SCORE_CEILING: f64 = 100.0;
const FLAT_BATCH_EPSILON: f64 = 1e-12;

/// Relative importance of each scored attribute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub vram: f64,
    pub mig: f64,
    pub nvlink: f64,
    pub tdp: f64,
    pub price: f64,
    pub quantization: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            vram: 0.3,
            mig: 0.1,
            nvlink: 0.1,
            tdp: 0.1,
            price: 0.3,
            quantization: 0.1,
        }
    }
}

impl ScoringWeights {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("vram", self.vram),
            ("mig", self.mig),
            ("nvlink", self.nvlink),
            ("tdp", self.tdp),
            ("price", self.price),
            ("quantization", self.quantization),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.named() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        if self.total() == 0.0 {
            return Err(ConfigError::AllWeightsZero);
        }
        Ok(())
    }

    /// Sum of the five attribute weights, quantization excluded.
    pub fn attribute_total(&self) -> f64 {
        self.vram + self.mig + self.nvlink + self.tdp + self.price
    }

    pub fn total(&self) -> f64 {
        self.attribute_total() + self.quantization
    }
}

/// How attribute values are mapped into [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeNormalization {
    /// Against the configured reference ranges, clamped
    #[default]
    FixedRange,
    /// Against the minimum and maximum seen in the batch
    BatchMinMax,
}

/// How summed scores are mapped onto [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalScaling {
    /// Batch minimum maps to 0 and maximum to 100
    #[default]
    BatchMinMax,
    /// Total divided by the sum of all weights
    WeightCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn normalize(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.max <= self.min {
            return Err(ConfigError::InvalidThreshold {
                name,
                value: self.max,
                expected: "expected finite bounds with max greater than min",
            });
        }
        Ok(())
    }
}

/// Reference ranges used by [`AttributeNormalization::FixedRange`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRanges {
    pub vram_gb: ValueRange,
    pub mig_level: ValueRange,
    pub tdp_watts: ValueRange,
    pub price: ValueRange,
    pub capacity: ValueRange,
}

impl Default for ReferenceRanges {
    fn default() -> Self {
        Self {
            vram_gb: ValueRange::new(0.0, 192.0),
            mig_level: ValueRange::new(0.0, 7.0),
            tdp_watts: ValueRange::new(0.0, 1000.0),
            price: ValueRange::new(0.0, 50_000.0),
            capacity: ValueRange::new(0.0, 16.0),
        }
    }
}

impl ReferenceRanges {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vram_gb.validate("scoring.ranges.vram_gb")?;
        self.mig_level.validate("scoring.ranges.mig_level")?;
        self.tdp_watts.validate("scoring.ranges.tdp_watts")?;
        self.price.validate("scoring.ranges.price")?;
        self.capacity.validate("scoring.ranges.capacity")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub normalization: AttributeNormalization,
    pub scaling: FinalScaling,
    pub ranges: ReferenceRanges,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        self.ranges.validate()
    }
}

/// Normalized values that contributed to a score; `None` means the
/// attribute was unavailable and its weight was redistributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub vram: Option<f64>,
    pub mig: Option<f64>,
    pub nvlink: Option<f64>,
    pub tdp: Option<f64>,
    pub price: Option<f64>,
    /// Mean normalized capacity across targets
    pub quantization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredListing {
    pub quantized: QuantizedListing,
    pub raw_score: f64,
    pub quantization_score: f64,
    pub final_score: f64,
    pub score_breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub scored: usize,
    pub min_final: f64,
    pub max_final: f64,
    pub mean_final: f64,
}

/// Raw attribute values of one listing before normalization
#[derive(Debug, Clone, Copy, Default)]
struct Attributes {
    vram: Option<f64>,
    mig: Option<f64>,
    nvlink: Option<f64>,
    tdp: Option<f64>,
    price: Option<f64>,
}

impl Attributes {
    fn of(listing: &QuantizedListing) -> Self {
        let specs = listing.enriched.specs;
        Self {
            vram: specs.map(|s| s.vram_gb),
            mig: specs.map(|s| f64::from(s.mig_level)),
            nvlink: specs.map(|s| if s.nvlink { 1.0 } else { 0.0 }),
            tdp: specs.map(|s| s.tdp_watts),
            price: listing.enriched.price(),
        }
    }
}

/// Ranges observed over a batch, for [`AttributeNormalization::BatchMinMax`]
#[derive(Debug, Clone, Default)]
struct BatchRanges {
    vram: Option<(f64, f64)>,
    mig: Option<(f64, f64)>,
    tdp: Option<(f64, f64)>,
    price: Option<(f64, f64)>,
    capacities: Vec<Option<(f64, f64)>>,
}

fn widen(range: &mut Option<(f64, f64)>, value: Option<f64>) {
    if let Some(v) = value {
        *range = Some(match *range {
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
            None => (v, v),
        });
    }
}

/// Position of `value` within the observed range, oriented so that 1.0 is
/// best. A flat column gives every listing the best value.
fn min_max_normalize(range: Option<(f64, f64)>, value: f64, lower_is_better: bool) -> f64 {
    match range {
        Some((lo, hi)) if hi - lo > FLAT_BATCH_EPSILON => {
            let n = ((value - lo) / (hi - lo)).clamp(0.0, 1.0);
            if lower_is_better {
                1.0 - n
            } else {
                n
            }
        }
        _ => 1.0,
    }
}

/// Weighted scoring of quantized listings onto a 0-100 scale
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    /// Fails on negative, non-finite or all-zero weights.
    pub fn new(config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, listings: Vec<QuantizedListing>) -> (Vec<ScoredListing>, ScoreSummary) {
        if listings.is_empty() {
            return (Vec::new(), ScoreSummary::default());
        }

        let attributes: Vec<Attributes> = listings.iter().map(Attributes::of).collect();
        let batch = self.batch_ranges(&listings, &attributes);

        let partial: Vec<(f64, f64, ScoreBreakdown)> = listings
            .iter()
            .zip(&attributes)
            .map(|(listing, attrs)| self.raw_terms(listing, attrs, &batch))
            .collect();
        let totals: Vec<f64> = partial.iter().map(|(raw, quant, _)| raw + quant).collect();
        let finals = self.scale(&totals);

        let scored: Vec<ScoredListing> = listings
            .into_iter()
            .zip(partial)
            .zip(finals)
            .map(|((quantized, (raw_score, quantization_score, score_breakdown)), final_score)| {
                debug!(
                    row = quantized.enriched.deduped.normalized.listing.row,
                    raw_score, quantization_score, final_score, "Scored listing"
                );
                ScoredListing {
                    quantized,
                    raw_score,
                    quantization_score,
                    final_score,
                    score_breakdown,
                }
            })
            .collect();

        let summary = summarize(&scored);
        info!(
            "Scored {} listings: min {:.2}, max {:.2}, mean {:.2}",
            summary.scored, summary.min_final, summary.max_final, summary.mean_final
        );
        (scored, summary)
    }

    fn batch_ranges(&self, listings: &[QuantizedListing], attributes: &[Attributes]) -> BatchRanges {
        let mut batch = BatchRanges::default();
        if self.config.normalization != AttributeNormalization::BatchMinMax {
            return batch;
        }
        for attrs in attributes {
            widen(&mut batch.vram, attrs.vram);
            widen(&mut batch.mig, attrs.mig);
            widen(&mut batch.tdp, attrs.tdp);
            widen(&mut batch.price, attrs.price);
        }
        for profile in listings.iter().filter_map(|l| l.quantization.as_ref()) {
            if batch.capacities.len() < profile.capacities.len() {
                batch.capacities.resize(profile.capacities.len(), None);
            }
            for (slot, target) in batch.capacities.iter_mut().zip(&profile.capacities) {
                widen(slot, Some(target.capacity as f64));
            }
        }
        batch
    }

    /// Returns `(raw_score, quantization_score, breakdown)`.
    fn raw_terms(&self, listing: &QuantizedListing, attrs: &Attributes, batch: &BatchRanges) -> (f64, f64, ScoreBreakdown) {
        let ranges = &self.config.ranges;
        let weights = &self.config.weights;
        let fixed = self.config.normalization == AttributeNormalization::FixedRange;

        let direct = |value: Option<f64>, range: &ValueRange, observed: Option<(f64, f64)>| {
            value.map(|v| if fixed { range.normalize(v) } else { min_max_normalize(observed, v, false) })
        };
        let inverse = |value: Option<f64>, range: &ValueRange, observed: Option<(f64, f64)>| {
            value.map(|v| if fixed { 1.0 - range.normalize(v) } else { min_max_normalize(observed, v, true) })
        };

        let mut breakdown = ScoreBreakdown {
            vram: direct(attrs.vram, &ranges.vram_gb, batch.vram),
            mig: direct(attrs.mig, &ranges.mig_level, batch.mig),
            nvlink: attrs.nvlink,
            tdp: inverse(attrs.tdp, &ranges.tdp_watts, batch.tdp),
            price: inverse(attrs.price, &ranges.price, batch.price),
            quantization: None,
        };

        let terms = [
            (weights.vram, breakdown.vram),
            (weights.mig, breakdown.mig),
            (weights.nvlink, breakdown.nvlink),
            (weights.tdp, breakdown.tdp),
            (weights.price, breakdown.price),
        ];
        let available_weight: f64 = terms.iter().filter(|(_, n)| n.is_some()).map(|(w, _)| w).sum();
        let raw_score = if available_weight > 0.0 {
            let weighted: f64 = terms.iter().filter_map(|(w, n)| n.map(|n| w * n)).sum();
            weighted * weights.attribute_total() / available_weight
        } else {
            0.0
        };

        let quantization_score = match listing.quantization.as_ref() {
            Some(profile) if !profile.is_zero() => {
                let mean = self.mean_capacity(profile, batch);
                breakdown.quantization = Some(mean);
                weights.quantization * mean
            }
            Some(_) => {
                breakdown.quantization = Some(0.0);
                0.0
            }
            None => 0.0,
        };

        (raw_score, quantization_score, breakdown)
    }

    fn mean_capacity(&self, profile: &QuantizationProfile, batch: &BatchRanges) -> f64 {
        if profile.capacities.is_empty() {
            return 0.0;
        }
        let sum: f64 = profile
            .capacities
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let capacity = target.capacity as f64;
                match self.config.normalization {
                    AttributeNormalization::FixedRange => self.config.ranges.capacity.normalize(capacity),
                    AttributeNormalization::BatchMinMax => {
                        min_max_normalize(batch.capacities.get(i).copied().flatten(), capacity, false)
                    }
                }
            })
            .sum();
        sum / profile.capacities.len() as f64
    }

    fn scale(&self, totals: &[f64]) -> Vec<f64> {
        match self.config.scaling {
            FinalScaling::WeightCeiling => {
                let ceiling = self.config.weights.total();
                totals
                    .iter()
                    .map(|t| (t / ceiling * SCORE_CEILING).clamp(0.0, SCORE_CEILING))
                    .collect()
            }
            FinalScaling::BatchMinMax => {
                let lo = totals.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = totals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if hi - lo <= FLAT_BATCH_EPSILON {
                    return vec![SCORE_CEILING; totals.len()];
                }
                totals
                    .iter()
                    .map(|t| ((t - lo) / (hi - lo) * SCORE_CEILING).clamp(0.0, SCORE_CEILING))
                    .collect()
            }
        }
    }
}

fn summarize(scored: &[ScoredListing]) -> ScoreSummary {
    if scored.is_empty() {
        return ScoreSummary::default();
    }
    let finals = scored.iter().map(|s| s.final_score);
    ScoreSummary {
        scored: scored.len(),
        min_final: finals.clone().fold(f64::INFINITY, f64::min),
        max_final: finals.clone().fold(f64::NEG_INFINITY, f64::max),
        mean_final: finals.sum::<f64>() / scored.len() as f64,
    }
}
