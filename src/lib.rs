pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod registry;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, Result, SchemaError};
pub use pipeline::{Pipeline, PipelineOutput, PipelineReport};
pub use registry::{CanonicalRegistry, ModelRegistry};
