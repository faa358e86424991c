//! Client-side configuration loading
//!
//! Loads `client.toml` from the sockexec config directory. Every key is
//! optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sockexec_protocol::DEFAULT_MAX_FILE_SIZE;
use sockexec_utils::{client_config_file, Result, SockexecError};

use crate::connection::ReconnectPolicy;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where downloads land when no local path is given
    pub download_dir: PathBuf,
    /// Largest file expected in a download, in bytes; sizes the WebSocket limit
    pub max_file_size: u64,
    pub reconnect: ReconnectConfig,
    /// Aliases usable in place of a URL
    pub remotes: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            reconnect: ReconnectConfig::default(),
            remotes: HashMap::new(),
        }
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Load from `path`, or from the default location
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(SockexecError::ConfigNotFound(path.to_path_buf()));
                }
                Self::load_from_path(path)
            }
            None => {
                let path = client_config_file();
                if !path.exists() {
                    tracing::debug!("Config file not found, using defaults");
                    return Ok(Self::default());
                }
                Self::load_from_path(&path)
            }
        }
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SockexecError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|e| SockexecError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::debug!("Loaded client config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve a remote alias to a URL; anything else is returned as is
    pub fn resolve_remote(&self, target: &str) -> String {
        self.remotes
            .get(target)
            .cloned()
            .unwrap_or_else(|| target.to_string())
    }

    /// Largest WebSocket message the client accepts
    pub fn max_message_size(&self) -> usize {
        sockexec_protocol::max_message_size(self.max_file_size)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
        }
    }
}
