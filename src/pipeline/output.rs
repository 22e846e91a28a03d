use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::pipeline::processing::dedup::DedupRole;
use crate::pipeline::processing::normalize::MatchType;
use crate::pipeline::processing::score::ScoredListing;

/// Flat, serializable view of a scored listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub row: usize,
    pub title: String,
    pub price: Option<f64>,
    pub quantity: u32,
    pub seller: Option<String>,
    pub region: Option<String>,
    pub source_url: Option<String>,
    pub canonical_model: Option<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub matched_on: Option<String>,
    pub dedup_group: Option<String>,
    pub dedup_role: Option<DedupRole>,
    pub vram_gb: Option<f64>,
    pub tdp_watts: Option<f64>,
    pub mig_level: Option<u8>,
    pub nvlink: Option<bool>,
    pub missing_metadata: bool,
    pub price_per_vram_gb: Option<f64>,
    /// `label=capacity` pairs joined with `;`, empty when quantization was skipped
    pub quantization_capacities: String,
    pub raw_score: f64,
    pub quantization_score: f64,
    pub final_score: f64,
}

impl From<&ScoredListing> for OutputRow {
    fn from(scored: &ScoredListing) -> Self {
        let enriched = &scored.quantized.enriched;
        let normalized = &enriched.deduped.normalized;
        let listing = &normalized.listing;
        let dedup = enriched.deduped.dedup.as_ref();

        let quantization_capacities = scored
            .quantized
            .quantization
            .as_ref()
            .map(|profile| {
                profile
                    .capacities
                    .iter()
                    .map(|c| format!("{}={}", c.label, c.capacity))
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default();

        Self {
            row: listing.row,
            title: listing.title.clone(),
            price: listing.price,
            quantity: listing.quantity,
            seller: listing.seller.clone(),
            region: listing.region.clone(),
            source_url: listing.source_url.clone(),
            canonical_model: normalized.canonical_model.clone(),
            match_type: normalized.match_type,
            confidence: normalized.confidence,
            matched_on: normalized.matched_on.clone(),
            dedup_group: dedup.map(|d| d.group_id.clone()),
            dedup_role: dedup.map(|d| d.role),
            vram_gb: enriched.specs.map(|s| s.vram_gb),
            tdp_watts: enriched.specs.map(|s| s.tdp_watts),
            mig_level: enriched.specs.map(|s| s.mig_level),
            nvlink: enriched.specs.map(|s| s.nvlink),
            missing_metadata: enriched.missing_metadata,
            price_per_vram_gb: enriched.price_per_vram_gb,
            quantization_capacities,
            raw_score: scored.raw_score,
            quantization_score: scored.quantization_score,
            final_score: scored.final_score,
        }
    }
}

pub fn to_output_rows(listings: &[ScoredListing]) -> Vec<OutputRow> {
    listings.iter().map(OutputRow::from).collect()
}

/// Write rows as `.csv` or `.json`, chosen by extension.
pub fn write_output<P: AsRef<Path>>(path: P, rows: &[OutputRow]) -> Result<()> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("csv") => {
            let mut writer = csv::Writer::from_path(path)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        Some("json") => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, rows)?;
            writer.flush()?;
        }
        other => {
            return Err(PipelineError::UnsupportedFormat(format!(
                "output file {} has extension {:?}, expected .csv or .json",
                path.display(),
                other
            )))
        }
    }
    info!("Wrote {} listings to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::clean::RawListing;
    use crate::pipeline::processing::dedup::{DedupAssignment, DedupedListing};
    use crate::pipeline::processing::enrich::EnrichedListing;
    use crate::pipeline::processing::normalize::NormalizedListing;
    use crate::pipeline::processing::quantize::{QuantizationProfile, QuantizedListing, TargetCapacity};
    use crate::pipeline::processing::score::ScoreBreakdown;
    use crate::registry::GpuSpecs;

    fn scored() -> ScoredListing {
        ScoredListing {
            quantized: QuantizedListing {
                enriched: EnrichedListing {
                    deduped: DedupedListing {
                        normalized: NormalizedListing {
                            listing: RawListing {
                                row: 3,
                                title: "PNY RTX 6000 Ada".into(),
                                price: Some(3199.0),
                                quantity: 2,
                                seller: Some("acme".into()),
                                region: Some("us".into()),
                                listing_age_days: Some(1.0),
                                source_url: None,
                                source_type: None,
                                bulk_notes: None,
                            },
                            canonical_model: Some("RTX_6000_ADA".into()),
                            match_type: MatchType::Fuzzy,
                            confidence: 0.92,
                            matched_on: Some("RTX 6000 Ada".into()),
                        },
                        dedup: Some(DedupAssignment {
                            group_id: "RTX_6000_ADA#3".into(),
                            role: DedupRole::Primary,
                            primary_row: 3,
                            group_size: 2,
                        }),
                    },
                    specs: Some(GpuSpecs {
                        vram_gb: 48.0,
                        tdp_watts: 300.0,
                        mig_level: 0,
                        nvlink: false,
                    }),
                    missing_metadata: false,
                    price_per_vram_gb: Some(66.5),
                },
                quantization: Some(QuantizationProfile {
                    formula_version: "quant-v1".into(),
                    capacities: vec![
                        TargetCapacity {
                            label: "7b_4bit".into(),
                            capacity: 9,
                        },
                        TargetCapacity {
                            label: "70b_4bit".into(),
                            capacity: 0,
                        },
                    ],
                }),
            },
            raw_score: 0.5,
            quantization_score: 0.03,
            final_score: 80.0,
            score_breakdown: ScoreBreakdown::default(),
        }
    }

    #[test]
    fn test_output_row_flattens_listing() {
        let row = OutputRow::from(&scored());
        assert_eq!(row.row, 3);
        assert_eq!(row.canonical_model.as_deref(), Some("RTX_6000_ADA"));
        assert_eq!(row.dedup_role, Some(DedupRole::Primary));
        assert_eq!(row.vram_gb, Some(48.0));
        assert_eq!(row.quantization_capacities, "7b_4bit=9;70b_4bit=0");
    }

    #[test]
    fn test_write_csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let rows = to_output_rows(&[scored()]);

        let csv_path = dir.path().join("out.csv");
        write_output(&csv_path, &rows).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.starts_with("row,title,price"));
        assert!(text.contains("RTX_6000_ADA#3,primary"));

        let json_path = dir.path().join("out.json");
        write_output(&json_path, &rows).unwrap();
        let parsed: Vec<OutputRow> = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_unknown_output_extension() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_output(dir.path().join("out.parquet"), &[]);
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }
}
