//! Curated-model registry reader.
//!
//! Reads a `gpuModels.models` array from the registry JSON and treats ids
//! outside it as invalid. Parses once at startup in `main` and holds the
//! result for the life of the process, rather than re-reading the file on
//! every validation call.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "gpuModels")]
    gpu_models: GpuModels,
}

#[derive(Debug, Deserialize)]
struct GpuModels {
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(rename = "huggingfaceId")]
    huggingface_id: String,
}

/// The curated set of model ids this worker is allowed to load.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    ids: Vec<String>,
    lookup: HashSet<String>,
}

impl ModelRegistry {
    pub fn load(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Io(format!("failed to read model registry {}: {e}", path.display())))?;
        let parsed: RegistryFile = serde_json::from_str(&raw)
            .map_err(|e| WorkerError::InvalidModel(format!("malformed model registry {}: {e}", path.display())))?;

        let ids: Vec<String> = parsed.gpu_models.models.into_iter().map(|m| m.huggingface_id).collect();
        let lookup = ids.iter().cloned().collect();
        Ok(Self { ids, lookup })
    }

    pub fn is_valid(&self, model_id: &str) -> bool {
        self.lookup.contains(model_id)
    }

    pub fn default_model(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("curated-models.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn valid_registry_parses_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            r#"{"gpuModels":{"models":[{"huggingfaceId":"sentence-transformers/all-MiniLM-L6-v2"},{"huggingfaceId":"BAAI/bge-large-en-v1.5"}]}}"#,
        );
        let registry = ModelRegistry::load(&path).unwrap();
        assert!(registry.is_valid("sentence-transformers/all-MiniLM-L6-v2"));
        assert!(!registry.is_valid("not-a-real-model"));
        assert_eq!(registry.default_model(), Some("sentence-transformers/all-MiniLM-L6-v2"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "not json");
        assert!(ModelRegistry::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ModelRegistry::load("/nonexistent/path/curated-models.json").is_err());
    }
}
