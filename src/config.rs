//! Analyzer configuration.
//!
//! Read from a JSON file for the CLI, or from the editor's initialization
//! options. Every field is optional.

use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use serde::Deserialize;

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[display("invalid configuration: {source}")]
    Parse { source: serde_json::Error },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Extra absolute import roots, tried before the workspace roots.
    pub roots: Vec<PathBuf>,
    /// Files read per background indexing batch.
    pub index_batch_size: usize,
    /// Quiet period before diagnostics for an edited document are published.
    pub debounce_ms: u64,
    /// Statistic names scripts may use. Empty disables the check.
    pub declared_statistics: Vec<String>,
    /// Hash tables defined outside the scripts (e.g. in kamailio.cfg).
    pub declared_htables: Vec<String>,
    /// Directory names skipped while indexing, on top of the defaults.
    pub excluded_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            index_batch_size: 50,
            debounce_ms: 300,
            declared_statistics: Vec::new(),
            declared_htables: Vec::new(),
            excluded_dirs: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse { source })?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config.normalized())
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|source| ConfigError::Parse { source })?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        if self.index_batch_size == 0 {
            tracing::warn!("indexBatchSize must be positive, using 1");
            self.index_batch_size = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = Config::from_value(json!({})).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.index_batch_size, 50);
        assert_eq!(config.debounce_ms, 300);
    }

    #[test]
    fn test_camel_case_fields() {
        let config = Config::from_value(json!({
            "roots": ["/opt/kamailio/lib"],
            "indexBatchSize": 10,
            "declaredStatistics": ["calls"],
            "declaredHtables": ["ipban"],
            "excludedDirs": ["build"],
        }))
        .unwrap();
        assert_eq!(config.roots, vec![PathBuf::from("/opt/kamailio/lib")]);
        assert_eq!(config.index_batch_size, 10);
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.declared_statistics, vec!["calls"]);
        assert_eq!(config.declared_htables, vec!["ipban"]);
        assert_eq!(config.excluded_dirs, vec!["build"]);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = Config::from_value(json!({ "indexBatchSize": 0 })).unwrap();
        assert_eq!(config.index_batch_size, 1);
    }

    #[test]
    fn test_bad_types_are_errors() {
        let error = Config::from_value(json!({ "debounceMs": "soon" })).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let error = Config::load(Path::new("/nonexistent/kemi-pv.json")).unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }));
        assert!(error.to_string().starts_with("cannot read /nonexistent/kemi-pv.json"));
    }
}
