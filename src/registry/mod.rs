// Canonical model registry: validated entries, alias/pattern indexes, file loader

pub mod loader;
pub mod model_registry;

pub use loader::load_registry;
pub use model_registry::{
    normalize_key, CanonicalModelEntry, CanonicalRegistry, CompiledPattern, GpuSpecs, ModelRegistry,
    PatternSpec, RegisteredAlias, RegistryDocument, DEFAULT_PATTERN_CONFIDENCE,
};
