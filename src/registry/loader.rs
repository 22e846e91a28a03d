use std::fs;
use std::path::Path;
use tracing::info;

use super::model_registry::{CanonicalRegistry, RegistryDocument};
use crate::error::{PipelineError, Result};

/// Load and validate a canonical model registry from a `.toml` or `.json` file.
///
/// Entry order in the file is preserved; it decides regex precedence and fuzzy
/// tie-breaks downstream.
pub fn load_registry<P: AsRef<Path>>(path: P) -> Result<CanonicalRegistry> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;

    let document: RegistryDocument = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        other => {
            return Err(PipelineError::UnsupportedFormat(format!(
                "registry file {} has extension {:?}, expected .toml or .json",
                path.display(),
                other
            )))
        }
    };

    let registry = CanonicalRegistry::from_document(document)?;
    info!(
        "Loaded {} canonical models from {}",
        registry.len(),
        path.display()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;
    use std::io::Write;

    #[test]
    fn test_load_json_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"models": [{{"canonical_name": "L4", "aliases": ["NVIDIA L4"],
                "specs": {{"vram_gb": 24.0, "tdp_watts": 72.0}}}}]}}"#
        )
        .unwrap();

        let registry = load_registry(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup_specs("L4").unwrap().tdp_watts, 72.0);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.yaml");
        fs::write(&path, "models: []").unwrap();
        assert!(matches!(load_registry(&path), Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_empty_registry_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        fs::write(&path, "").unwrap();
        assert!(matches!(load_registry(&path), Err(PipelineError::Config(_))));
    }
}
