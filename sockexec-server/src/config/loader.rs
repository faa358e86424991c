//! Configuration loader

use std::path::Path;

use sockexec_utils::{server_config_file, Result, SockexecError};

use super::ServerConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<ServerConfig> {
        let path = server_config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(ServerConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<ServerConfig> {
        if !path.exists() {
            return Err(SockexecError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| SockexecError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<ServerConfig> {
        toml::from_str(content).map_err(|e| SockexecError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &ServerConfig) -> Result<()> {
        config.listen_addr()?;

        if config.shell.trim().is_empty() {
            return Err(SockexecError::config("shell must not be empty"));
        }

        if config.max_file_size == 0 {
            return Err(SockexecError::config("max_file_size must be greater than 0"));
        }

        if config.outbound_buffer == 0 {
            return Err(SockexecError::config("outbound_buffer must be at least 1"));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<ServerConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}
