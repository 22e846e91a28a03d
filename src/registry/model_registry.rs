use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

/// Confidence assigned to a regex hit when the pattern does not declare one.
pub const DEFAULT_PATTERN_CONFIDENCE: f64 = 0.9;

/// Highest Multi-Instance GPU partitioning level a model may declare.
pub const MAX_MIG_LEVEL: u8 = 7;

/// Hardware specifications attached to a canonical model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuSpecs {
    /// Onboard memory in GB
    pub vram_gb: f64,
    /// Thermal design power in watts
    pub tdp_watts: f64,
    /// Multi-Instance GPU level, 0 (none) to 7
    #[serde(default)]
    pub mig_level: u8,
    /// Whether the board exposes an NVLink bridge
    #[serde(default)]
    pub nvlink: bool,
}

/// A regex pattern as written in the registry file: either a bare string or a
/// pattern with an explicit confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Plain(String),
    Weighted {
        pattern: String,
        #[serde(default = "default_pattern_confidence")]
        confidence: f64,
    },
}

fn default_pattern_confidence() -> f64 {
    DEFAULT_PATTERN_CONFIDENCE
}

impl PatternSpec {
    pub fn pattern(&self) -> &str {
        match self {
            PatternSpec::Plain(p) => p,
            PatternSpec::Weighted { pattern, .. } => pattern,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            PatternSpec::Plain(_) => DEFAULT_PATTERN_CONFIDENCE,
            PatternSpec::Weighted { confidence, .. } => *confidence,
        }
    }
}

/// One registry record. `canonical_name` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalModelEntry {
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub match_patterns: Vec<PatternSpec>,
    #[serde(default)]
    pub specs: Option<GpuSpecs>,
}

impl CanonicalModelEntry {
    pub fn new(canonical_name: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            match_patterns: Vec::new(),
            specs: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.match_patterns.push(PatternSpec::Plain(pattern.into()));
        self
    }

    pub fn with_weighted_pattern(mut self, pattern: impl Into<String>, confidence: f64) -> Self {
        self.match_patterns.push(PatternSpec::Weighted {
            pattern: pattern.into(),
            confidence,
        });
        self
    }

    pub fn with_specs(mut self, specs: GpuSpecs) -> Self {
        self.specs = Some(specs);
        self
    }
}

/// Serialized form of a registry file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default, alias = "model")]
    pub models: Vec<CanonicalModelEntry>,
}

/// An alias resolved against the registry
#[derive(Debug, Clone)]
pub struct RegisteredAlias {
    /// The alias as written in the registry
    pub alias: String,
    /// Lowercased, whitespace-collapsed form used for exact lookups
    pub normalized: String,
    pub canonical_name: String,
}

/// A match pattern compiled once at registry construction
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub canonical_name: String,
    pub source: String,
    pub regex: Regex,
    pub confidence: f64,
}

/// Read-only view of the canonical model registry used by every stage.
///
/// Iteration order is part of the contract: patterns and aliases are yielded
/// in registry file order, which decides regex precedence and fuzzy ties.
pub trait ModelRegistry: Send + Sync {
    /// Exact alias lookup on an already-normalized key (see [`normalize_key`]).
    fn lookup_by_alias(&self, normalized: &str) -> Option<&RegisteredAlias>;

    fn iterate_patterns(&self) -> std::slice::Iter<'_, CompiledPattern>;

    fn iterate_aliases(&self) -> std::slice::Iter<'_, RegisteredAlias>;

    fn lookup_specs(&self, canonical_name: &str) -> Option<&GpuSpecs>;
}

/// Lowercase and collapse runs of whitespace to a single space.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validated, indexed canonical model registry
#[derive(Debug, Clone)]
pub struct CanonicalRegistry {
    entries: Vec<CanonicalModelEntry>,
    by_name: HashMap<String, usize>,
    /// normalized alias -> position in `aliases`
    alias_index: HashMap<String, usize>,
    aliases: Vec<RegisteredAlias>,
    patterns: Vec<CompiledPattern>,
}

impl CanonicalRegistry {
    /// Validate entries and build the lookup indexes. Any problem here is
    /// configuration-fatal.
    pub fn new(mut entries: Vec<CanonicalModelEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let mut by_name = HashMap::with_capacity(entries.len());
        let mut alias_index: HashMap<String, usize> = HashMap::new();
        let mut aliases: Vec<RegisteredAlias> = Vec::new();
        let mut patterns = Vec::new();

        for (index, entry) in entries.iter_mut().enumerate() {
            entry.canonical_name = entry.canonical_name.trim().to_string();
            let name = entry.canonical_name.as_str();
            if name.is_empty() {
                return Err(ConfigError::BlankCanonicalName { index });
            }
            if by_name.insert(name.to_string(), index).is_some() {
                return Err(ConfigError::DuplicateCanonicalName(name.to_string()));
            }

            if let Some(specs) = &entry.specs {
                validate_specs(name, specs)?;
            }

            for alias in entry.aliases.iter().map(String::as_str) {
                let normalized = normalize_key(alias);
                if normalized.is_empty() {
                    continue;
                }
                if let Some(&existing) = alias_index.get(&normalized) {
                    let owner: &RegisteredAlias = &aliases[existing];
                    if owner.canonical_name == name {
                        continue;
                    }
                    return Err(ConfigError::AmbiguousAlias {
                        alias: alias.to_string(),
                        first: owner.canonical_name.clone(),
                        second: name.to_string(),
                    });
                }
                alias_index.insert(normalized.clone(), aliases.len());
                aliases.push(RegisteredAlias {
                    alias: alias.to_string(),
                    normalized,
                    canonical_name: name.to_string(),
                });
            }

            for spec in &entry.match_patterns {
                let confidence = spec.confidence();
                if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                    return Err(ConfigError::InvalidPatternConfidence {
                        canonical_name: name.to_string(),
                        pattern: spec.pattern().to_string(),
                        confidence,
                    });
                }
                let regex = RegexBuilder::new(spec.pattern())
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::InvalidPattern {
                        canonical_name: name.to_string(),
                        pattern: spec.pattern().to_string(),
                        source,
                    })?;
                patterns.push(CompiledPattern {
                    canonical_name: name.to_string(),
                    source: spec.pattern().to_string(),
                    regex,
                    confidence,
                });
            }
        }

        Ok(Self {
            entries,
            by_name,
            alias_index,
            aliases,
            patterns,
        })
    }

    pub fn from_document(document: RegistryDocument) -> Result<Self, ConfigError> {
        Self::new(document.models)
    }

    pub fn entries(&self) -> &[CanonicalModelEntry] {
        &self.entries
    }

    pub fn get(&self, canonical_name: &str) -> Option<&CanonicalModelEntry> {
        self.by_name.get(canonical_name).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModelRegistry for CanonicalRegistry {
    fn lookup_by_alias(&self, normalized: &str) -> Option<&RegisteredAlias> {
        self.alias_index.get(normalized).map(|&i| &self.aliases[i])
    }

    fn iterate_patterns(&self) -> std::slice::Iter<'_, CompiledPattern> {
        self.patterns.iter()
    }

    fn iterate_aliases(&self) -> std::slice::Iter<'_, RegisteredAlias> {
        self.aliases.iter()
    }

    fn lookup_specs(&self, canonical_name: &str) -> Option<&GpuSpecs> {
        self.get(canonical_name).and_then(|e| e.specs.as_ref())
    }
}

fn validate_specs(name: &str, specs: &GpuSpecs) -> Result<(), ConfigError> {
    if specs.mig_level > MAX_MIG_LEVEL {
        return Err(ConfigError::MigLevelOutOfRange {
            canonical_name: name.to_string(),
            level: specs.mig_level,
        });
    }
    if !specs.vram_gb.is_finite() || specs.vram_gb <= 0.0 {
        return Err(ConfigError::InvalidSpec {
            canonical_name: name.to_string(),
            field: "vram_gb",
            value: specs.vram_gb,
        });
    }
    if !specs.tdp_watts.is_finite() || specs.tdp_watts < 0.0 {
        return Err(ConfigError::InvalidSpec {
            canonical_name: name.to_string(),
            field: "tdp_watts",
            value: specs.tdp_watts,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(vram_gb: f64) -> GpuSpecs {
        GpuSpecs {
            vram_gb,
            tdp_watts: 300.0,
            mig_level: 0,
            nvlink: false,
        }
    }

    #[test]
    fn test_empty_registry_is_rejected() {
        assert!(matches!(CanonicalRegistry::new(Vec::new()), Err(ConfigError::EmptyRegistry)));
    }

    #[test]
    fn test_duplicate_canonical_name_is_rejected() {
        let result = CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("A100_80GB"),
            CanonicalModelEntry::new("A100_80GB"),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateCanonicalName(name)) if name == "A100_80GB"));
    }

    #[test]
    fn test_malformed_pattern_names_entry_and_pattern() {
        let result = CanonicalRegistry::new(vec![CanonicalModelEntry::new("L40S").with_pattern("(l40s")]);
        match result {
            Err(ConfigError::InvalidPattern { canonical_name, pattern, .. }) => {
                assert_eq!(canonical_name, "L40S");
                assert_eq!(pattern, "(l40s");
            }
            other => panic!("expected InvalidPattern, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_claimed_twice_is_rejected() {
        let result = CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("A2").with_aliases(["nvidia a2"]),
            CanonicalModelEntry::new("A2_16GB").with_aliases(["NVIDIA  A2"]),
        ]);
        assert!(matches!(result, Err(ConfigError::AmbiguousAlias { .. })));
    }

    #[test]
    fn test_canonical_name_may_equal_another_entrys_alias() {
        let registry = CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("T4"),
            CanonicalModelEntry::new("TESLA_T4").with_aliases(["T4"]),
        ])
        .unwrap();
        assert_eq!(registry.lookup_by_alias("t4").unwrap().canonical_name, "TESLA_T4");
        assert_eq!(registry.iterate_aliases().count(), 1);
    }

    #[test]
    fn test_mig_level_above_seven_is_rejected() {
        let mut bad = specs(80.0);
        bad.mig_level = 8;
        let result = CanonicalRegistry::new(vec![CanonicalModelEntry::new("H100").with_specs(bad)]);
        assert!(matches!(result, Err(ConfigError::MigLevelOutOfRange { level: 8, .. })));
    }

    #[test]
    fn test_pattern_confidence_out_of_range_is_rejected() {
        let result =
            CanonicalRegistry::new(vec![CanonicalModelEntry::new("H100").with_weighted_pattern("h100", 1.5)]);
        assert!(matches!(result, Err(ConfigError::InvalidPatternConfidence { .. })));
    }

    #[test]
    fn test_lookups_preserve_registry_order() {
        let registry = CanonicalRegistry::new(vec![
            CanonicalModelEntry::new("RTX_6000_ADA")
                .with_aliases(["RTX 6000 Ada Generation"])
                .with_pattern(r"rtx\s*6000\s*ada")
                .with_specs(specs(48.0)),
            CanonicalModelEntry::new("L40S").with_pattern("l40s").with_specs(specs(48.0)),
        ])
        .unwrap();

        let hit = registry.lookup_by_alias("rtx 6000 ada generation").unwrap();
        assert_eq!(hit.canonical_name, "RTX_6000_ADA");

        // canonical names are keys, not aliases
        assert!(registry.lookup_by_alias("rtx 6000 ada").is_none());

        let order: Vec<_> = registry.iterate_patterns().map(|p| p.canonical_name.as_str()).collect();
        assert_eq!(order, vec!["RTX_6000_ADA", "L40S"]);
        assert_eq!(registry.iterate_patterns().next().unwrap().confidence, DEFAULT_PATTERN_CONFIDENCE);

        assert_eq!(registry.lookup_specs("L40S").unwrap().vram_gb, 48.0);
        assert!(registry.lookup_specs("UNKNOWN_SKU").is_none());
    }

    #[test]
    fn test_registry_document_accepts_plain_and_weighted_patterns() {
        let doc: RegistryDocument = toml::from_str(
            r#"
            [[model]]
            canonical_name = "A2"
            aliases = ["Tesla A2"]
            match_patterns = ["^NVIDIA A2$", { pattern = "\\ba2\\b", confidence = 0.6 }, { pattern = "a2 tensor" }]
            specs = { vram_gb = 16.0, tdp_watts = 60.0 }
            "#,
        )
        .unwrap();

        let entry = &doc.models[0];
        assert_eq!(entry.match_patterns[0].confidence(), 0.9);
        assert_eq!(entry.match_patterns[1].confidence(), 0.6);
        assert_eq!(entry.match_patterns[2].confidence(), DEFAULT_PATTERN_CONFIDENCE);
        assert_eq!(entry.specs.unwrap().mig_level, 0);
        assert!(CanonicalRegistry::from_document(doc).is_ok());
    }
}
