// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine configuration.
//!
//! Defaults, then an optional JSON file, then `VIRODB_*` environment
//! variables. Command-line flags are applied on top by the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Which storage backend holds entities and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local; everything is lost on exit.
    Memory,
    /// Single-file redb database at `data_path`.
    #[default]
    Redb,
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redb" => Ok(BackendKind::Redb),
            other => Err(EngineError::Config(format!(
                "unknown backend '{other}', expected 'memory' or 'redb'"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Redb => f.write_str("redb"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// Database file used by the redb backend.
    pub data_path: PathBuf,
    /// Records returned by a history listing when no limit is given.
    pub history_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_path: PathBuf::from("virodb.redb"),
            history_page_size: 15,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `VIRODB_BACKEND`, `VIRODB_DATA_PATH` and
    /// `VIRODB_HISTORY_PAGE_SIZE`.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply environment overrides read through `lookup`.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        if let Some(backend) = lookup("VIRODB_BACKEND").filter(|v| !v.is_empty()) {
            self.backend = backend.parse()?;
        }
        if let Some(path) = lookup("VIRODB_DATA_PATH").filter(|v| !v.is_empty()) {
            self.data_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("VIRODB_HISTORY_PAGE_SIZE").filter(|v| !v.is_empty()) {
            self.history_page_size = size.trim().parse().map_err(|_| {
                EngineError::Config(format!("VIRODB_HISTORY_PAGE_SIZE must be a positive integer, got '{size}'"))
            })?;
        }
        if self.history_page_size == 0 {
            return Err(EngineError::Config("history_page_size must be at least 1".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendKind::Redb);
        assert_eq!(config.data_path, PathBuf::from("virodb.redb"));
        assert_eq!(config.history_page_size, 15);
    }

    #[test]
    fn test_env_overlay() {
        let config = EngineConfig::default()
            .overlay(env(&[
                ("VIRODB_BACKEND", "Memory"),
                ("VIRODB_DATA_PATH", "/var/lib/virodb/data.redb"),
                ("VIRODB_HISTORY_PAGE_SIZE", "25"),
            ]))
            .unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.data_path, PathBuf::from("/var/lib/virodb/data.redb"));
        assert_eq!(config.history_page_size, 25);
    }

    #[test]
    fn test_env_overlay_rejects_bad_values() {
        assert!(EngineConfig::default().overlay(env(&[("VIRODB_BACKEND", "mongo")])).is_err());
        assert!(EngineConfig::default()
            .overlay(env(&[("VIRODB_HISTORY_PAGE_SIZE", "many")]))
            .is_err());
        assert!(EngineConfig::default()
            .overlay(env(&[("VIRODB_HISTORY_PAGE_SIZE", "0")]))
            .is_err());
    }

    #[test]
    fn test_from_file_fills_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("virodb.json");
        std::fs::write(&path, r#"{"backend": "memory"}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.history_page_size, 15);

        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
