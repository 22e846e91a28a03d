use thiserror::Error;

/// Errors that abort a run before any row is processed.
///
/// Every variant carries enough context (which weight, which pattern, which
/// entry) to fix the configuration without looking at input data.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("canonical model registry is empty")]
    EmptyRegistry,

    #[error("canonical name '{0}' appears more than once in the registry")]
    DuplicateCanonicalName(String),

    #[error("canonical model entry #{index} has an empty canonical_name")]
    BlankCanonicalName { index: usize },

    #[error("alias '{alias}' is claimed by both '{first}' and '{second}'")]
    AmbiguousAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("invalid match pattern '{pattern}' for '{canonical_name}': {source}")]
    InvalidPattern {
        canonical_name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{pattern}' for '{canonical_name}' has confidence {confidence}, expected a value in [0, 1]")]
    InvalidPatternConfidence {
        canonical_name: String,
        pattern: String,
        confidence: f64,
    },

    #[error("'{canonical_name}' declares MIG level {level}, expected 0-7")]
    MigLevelOutOfRange { canonical_name: String, level: u8 },

    #[error("'{canonical_name}' has invalid {field} value {value}")]
    InvalidSpec {
        canonical_name: String,
        field: &'static str,
        value: f64,
    },

    #[error("scoring weight '{name}' is {value}; weights must be finite and non-negative")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("all scoring weights are zero; the score scale would be undefined")]
    AllWeightsZero,

    #[error("{name} is {value}; {expected}")]
    InvalidThreshold {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("invalid quantization setting: {0}")]
    InvalidQuantization(String),

    #[error("cleaner header map: {0}")]
    InvalidHeaderMap(String),
}

/// Row-level schema problems found by the cleaner. Never fatal: the row is
/// dropped and reported in the clean summary.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SchemaError {
    #[error("row {row}: required header '{header}' could not be resolved from any variant")]
    MissingHeader { row: usize, header: String },

    #[error("row {row}: required field '{field}' is empty")]
    EmptyField { row: usize, field: String },
}

impl SchemaError {
    pub fn row(&self) -> usize {
        match self {
            SchemaError::MissingHeader { row, .. } | SchemaError::EmptyField { row, .. } => *row,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
