//! Service configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use mathsearch_index::{EngineKind, IndexingOptions};

/// Configuration of a [`crate::SearchService`], loadable from JSON.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```json
/// { "data_path": "/var/lib/mathsearch", "engine": "streaming" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the logs and index images.
    pub data_path: PathBuf,
    pub indexing: IndexingOptions,
    pub engine: EngineKind,
    /// Upper bound on the answers returned for one query.
    pub max_answers: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./mathsearch-data"),
            indexing: IndexingOptions::default(),
            engine: EngineKind::default(),
            max_answers: 1000,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mathsearch.json");
        std::fs::write(&file, r#"{ "engine": "streaming", "indexing": { "rename_ci": false } }"#)
            .unwrap();
        let config = ServiceConfig::load(&file).unwrap();
        assert_eq!(config.engine, EngineKind::Streaming);
        assert!(!config.indexing.rename_ci);
        assert_eq!(config.max_answers, 1000);
        assert_eq!(config.data_path, PathBuf::from("./mathsearch-data"));
    }

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert!(config.indexing.rename_ci);
        assert_eq!(config.engine, EngineKind::Batch);
    }

    #[test]
    fn unknown_engine_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, r#"{ "engine": "turbo" }"#).unwrap();
        assert!(ServiceConfig::load(&file).is_err());
    }
}
