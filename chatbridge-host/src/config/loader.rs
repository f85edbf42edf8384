//! Configuration loader

use std::path::Path;

use chatbridge_utils::{config_file, BridgeError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.supervisor.grace_period_ms < 100 {
            return Err(BridgeError::config("grace_period_ms must be at least 100"));
        }

        if config.supervisor.locate_retry_attempts == 0 {
            return Err(BridgeError::config(
                "locate_retry_attempts must be at least 1",
            ));
        }

        if config.supervisor.locate_retry_interval_ms < 10 {
            return Err(BridgeError::config(
                "locate_retry_interval_ms must be at least 10",
            ));
        }

        if config.server.ports.contains(&0) {
            return Err(BridgeError::config("server ports must be non-zero"));
        }

        if config.session.diagnostics_capacity == 0 {
            return Err(BridgeError::config(
                "diagnostics_capacity must be at least 1",
            ));
        }

        if config.binaries.server_name.trim().is_empty()
            || config.binaries.client_name.trim().is_empty()
        {
            return Err(BridgeError::config("executable names must not be empty"));
        }

        Ok(())
    }

    /// Load from `path` (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}
