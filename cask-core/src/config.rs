//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/cask/config.toml` (or `--config <path>`).
//! Every field has a default so a missing file or an empty table is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ServiceError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Default `tracing` filter; overridden by `RUST_LOG` at runtime.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path. Defaults to `<data-dir>/secrets.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ServiceError> {
        toml::from_str(text).map_err(|e| ServiceError::InvalidArgs(format!("config parse: {e}")))
    }

    /// Resolve the database file path, honoring the `[storage] path` override.
    pub fn database_path(&self) -> Result<PathBuf, ServiceError> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("secrets.db")),
        }
    }
}

/// Per-user data directory: `$XDG_DATA_HOME/cask` or `$HOME/.local/share/cask`.
pub fn data_dir() -> Result<PathBuf, ServiceError> {
    let base = if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        return Err(ServiceError::Storage(
            "cannot locate data directory: neither XDG_DATA_HOME nor HOME is set".to_string(),
        ));
    };
    Ok(base.join("cask"))
}

/// Default config file path: `$XDG_CONFIG_HOME/cask/config.toml`.
pub fn default_config_path() -> PathBuf {
    let mut base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_default();
            PathBuf::from(home).join(".config")
        });
    base.push("cask");
    base.push("config.toml");
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.service.log_filter, "info");
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn storage_path_override() {
        let config = Config::from_toml("[storage]\npath = \"/tmp/test.db\"\n").unwrap();
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/test.db")
        );
    }

    #[test]
    fn unknown_log_filter_is_kept_verbatim() {
        let config = Config::from_toml("[service]\nlog_filter = \"cask=debug\"\n").unwrap();
        assert_eq!(config.service.log_filter, "cask=debug");
    }

    #[test]
    fn malformed_toml_is_invalid_args() {
        let err = Config::from_toml("[storage\npath = 3").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgs(_)));
    }
}
