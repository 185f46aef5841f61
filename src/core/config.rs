// src/core/config.rs

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::core::common::EngineError;

/// Represents the configuration for an Oxidx engine.
///
/// Supports loading from a TOML file and provides sensible default values
/// for every field.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of concurrently active transactions, iterator-owned
    /// autocommit transactions included. Beginning a transaction beyond this
    /// limit fails with `OutOfMemory`.
    /// Default: 1024
    #[serde(default = "default_max_active_transactions")]
    pub max_active_transactions: usize,
}

fn default_max_active_transactions() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_active_transactions: default_max_active_transactions() }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the specified file does not exist, default configuration values
    /// are returned.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if the file cannot be read or if
    /// parsing fails.
    pub fn load_from_file(path: &Path) -> Result<Self, EngineError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                EngineError::Configuration(format!(
                    "failed to parse config file '{}': {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EngineConfig::default()),
            Err(e) => Err(EngineError::Configuration(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Loads configuration from an optional TOML file path; `None` or a
    /// missing file yields the defaults.
    pub fn load_from_file_optional(optional_path: Option<&Path>) -> Result<Self, EngineError> {
        match optional_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_active_transactions, 1024);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = EngineConfig::load_from_file(Path::new("no_such_oxidx_config.toml")).unwrap();
        assert_eq!(config.max_active_transactions, 1024);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_active_transactions = 8").unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_active_transactions, 8);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wal_enabled = true").unwrap();
        let result = EngineConfig::load_from_file(file.path());
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_load_optional_none() {
        let config = EngineConfig::load_from_file_optional(None).unwrap();
        assert_eq!(config.max_active_transactions, 1024);
    }
}
