use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::processing::enrich::EnrichedListing;

/// Version tag of the capacity formula, recorded in every profile
pub const FORMULA_VERSION: &str = "quant-v1";

/// A model size and bit-width to compute capacity for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationTarget {
    pub label: String,
    pub params_billions: f64,
    pub bits: f64,
}

impl QuantizationTarget {
    pub fn new(label: impl Into<String>, params_billions: f64, bits: f64) -> Self {
        Self {
            label: label.into(),
            params_billions,
            bits,
        }
    }
}

/// Constants of the `quant-v1` formula
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    pub enabled: bool,
    /// Bytes held back for the driver and runtime
    pub reserved_overhead_bytes: f64,
    /// Extra bits per parameter for scales and zero points
    pub bits_overhead: f64,
    /// Multiplier on weight memory for KV cache and activations
    pub instance_overhead_factor: f64,
    pub targets: Vec<QuantizationTarget>,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reserved_overhead_bytes: 1.0e9,
            bits_overhead: 0.5,
            instance_overhead_factor: 1.2,
            targets: vec![
                QuantizationTarget::new("7b_4bit", 7.0, 4.0),
                QuantizationTarget::new("13b_4bit", 13.0, 4.0),
                QuantizationTarget::new("70b_4bit", 70.0, 4.0),
            ],
        }
    }
}

impl QuantizationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reserved_overhead_bytes.is_finite() || self.reserved_overhead_bytes < 0.0 {
            return Err(ConfigError::InvalidQuantization(format!(
                "reserved_overhead_bytes must be finite and non-negative, got {}",
                self.reserved_overhead_bytes
            )));
        }
        if !self.bits_overhead.is_finite() || self.bits_overhead < 0.0 {
            return Err(ConfigError::InvalidQuantization(format!(
                "bits_overhead must be finite and non-negative, got {}",
                self.bits_overhead
            )));
        }
        if !self.instance_overhead_factor.is_finite() || self.instance_overhead_factor <= 0.0 {
            return Err(ConfigError::InvalidQuantization(format!(
                "instance_overhead_factor must be finite and positive, got {}",
                self.instance_overhead_factor
            )));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::InvalidQuantization(
                "at least one target is required".to_string(),
            ));
        }

        let mut labels = BTreeSet::new();
        for target in &self.targets {
            if target.label.trim().is_empty() {
                return Err(ConfigError::InvalidQuantization("target label is blank".to_string()));
            }
            if !labels.insert(target.label.as_str()) {
                return Err(ConfigError::InvalidQuantization(format!(
                    "duplicate target label '{}'",
                    target.label
                )));
            }
            if !target.params_billions.is_finite() || target.params_billions <= 0.0 {
                return Err(ConfigError::InvalidQuantization(format!(
                    "target '{}': params_billions must be finite and positive, got {}",
                    target.label, target.params_billions
                )));
            }
            if !target.bits.is_finite() || target.bits <= 0.0 {
                return Err(ConfigError::InvalidQuantization(format!(
                    "target '{}': bits must be finite and positive, got {}",
                    target.label, target.bits
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCapacity {
    pub label: String,
    pub capacity: u64,
}

/// Instance capacities of one card, in target order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationProfile {
    pub formula_version: String,
    pub capacities: Vec<TargetCapacity>,
}

impl QuantizationProfile {
    pub fn is_zero(&self) -> bool {
        self.capacities.iter().all(|c| c.capacity == 0)
    }

    pub fn capacity(&self, label: &str) -> Option<u64> {
        self.capacities
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedListing {
    pub enriched: EnrichedListing,
    /// `None` when the stage is disabled
    pub quantization: Option<QuantizationProfile>,
}

impl QuantizedListing {
    pub fn unquantized(enriched: EnrichedListing) -> Self {
        Self {
            enriched,
            quantization: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationSummary {
    pub profiled: usize,
    pub zero_profiles: usize,
}

#[derive(Debug, Clone)]
pub struct QuantizationCalculator {
    config: QuantizationConfig,
}

impl QuantizationCalculator {
    pub fn new(config: QuantizationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn formula_version(&self) -> &'static str {
        FORMULA_VERSION
    }

    /// Instances of `target` that fit in `vram_gb`.
    pub fn capacity(&self, vram_gb: f64, target: &QuantizationTarget) -> u64 {
        let usable_bytes = vram_gb * 1.0e9 - self.config.reserved_overhead_bytes;
        if !usable_bytes.is_finite() || usable_bytes <= 0.0 {
            return 0;
        }
        let param_budget = usable_bytes * 8.0 / (target.bits + self.config.bits_overhead);
        let per_instance = target.params_billions * 1.0e9 * self.config.instance_overhead_factor;
        (param_budget / per_instance).floor().max(0.0) as u64
    }

    /// Profile for a card; unknown VRAM yields all zeros.
    pub fn profile(&self, vram_gb: Option<f64>) -> QuantizationProfile {
        let capacities = self
            .config
            .targets
            .iter()
            .map(|target| TargetCapacity {
                label: target.label.clone(),
                capacity: vram_gb.map_or(0, |v| self.capacity(v, target)),
            })
            .collect();
        QuantizationProfile {
            formula_version: FORMULA_VERSION.to_string(),
            capacities,
        }
    }

    pub fn quantize(&self, listings: Vec<EnrichedListing>) -> (Vec<QuantizedListing>, QuantizationSummary) {
        let mut summary = QuantizationSummary::default();
        let quantized = listings
            .into_iter()
            .map(|enriched| {
                let profile = self.profile(enriched.vram_gb());
                summary.profiled += 1;
                if profile.is_zero() {
                    summary.zero_profiles += 1;
                    debug!(row = enriched.deduped.normalized.listing.row, "Zero quantization profile");
                }
                QuantizedListing {
                    enriched,
                    quantization: Some(profile),
                }
            })
            .collect();

        info!(
            "Computed {} quantization profiles ({}), {} all zero",
            summary.profiled, FORMULA_VERSION, summary.zero_profiles
        );
        (quantized, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> QuantizationCalculator {
        QuantizationCalculator::new(QuantizationConfig::default()).unwrap()
    }

    #[test]
    fn test_default_targets_on_48gb_card() {
        let profile = calculator().profile(Some(48.0));
        assert_eq!(profile.formula_version, "quant-v1");
        assert_eq!(profile.capacity("7b_4bit"), Some(9));
        assert_eq!(profile.capacity("13b_4bit"), Some(5));
        assert_eq!(profile.capacity("70b_4bit"), Some(0));
    }

    #[test]
    fn test_80gb_card_fits_one_70b_instance() {
        assert_eq!(calculator().profile(Some(80.0)).capacity("70b_4bit"), Some(1));
    }

    #[test]
    fn test_unknown_vram_is_all_zero() {
        let profile = calculator().profile(None);
        assert!(profile.is_zero());
        assert_eq!(profile.capacities.len(), 3);
    }

    #[test]
    fn test_tiny_card_clamps_to_zero() {
        assert!(calculator().profile(Some(0.5)).is_zero());
    }

    #[test]
    fn test_capacity_monotone_in_vram_and_size() {
        let calc = calculator();
        let sizes = [1.0, 3.0, 7.0, 13.0, 34.0, 70.0];
        let vrams = [4.0, 8.0, 16.0, 24.0, 40.0, 48.0, 80.0, 141.0, 192.0];
        for bits in [2.0, 4.0, 8.0, 16.0] {
            for size in sizes {
                let target = QuantizationTarget::new("t", size, bits);
                let caps: Vec<u64> = vrams.iter().map(|v| calc.capacity(*v, &target)).collect();
                assert!(caps.windows(2).all(|w| w[0] <= w[1]), "vram not monotone: {:?}", caps);
            }
            for vram in vrams {
                let caps: Vec<u64> = sizes
                    .iter()
                    .map(|s| calc.capacity(vram, &QuantizationTarget::new("t", *s, bits)))
                    .collect();
                assert!(caps.windows(2).all(|w| w[0] >= w[1]), "size not monotone: {:?}", caps);
            }
        }
    }

    #[test]
    fn test_invalid_constants_are_rejected() {
        let bad_bits = QuantizationConfig {
            targets: vec![QuantizationTarget::new("zero", 7.0, 0.0)],
            ..Default::default()
        };
        assert!(matches!(
            QuantizationCalculator::new(bad_bits),
            Err(ConfigError::InvalidQuantization(_))
        ));

        let bad_factor = QuantizationConfig {
            instance_overhead_factor: f64::NAN,
            ..Default::default()
        };
        assert!(QuantizationCalculator::new(bad_factor).is_err());

        let duplicate = QuantizationConfig {
            targets: vec![
                QuantizationTarget::new("7b", 7.0, 4.0),
                QuantizationTarget::new("7b", 7.0, 8.0),
            ],
            ..Default::default()
        };
        assert!(QuantizationCalculator::new(duplicate).is_err());
    }
}
