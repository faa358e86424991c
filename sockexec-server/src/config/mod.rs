//! Configuration management for sockexec server
//!
//! Values come from `server.toml` and are then overridden by command-line
//! flags and environment variables.

mod loader;
mod schema;

use std::path::PathBuf;

pub use loader::ConfigLoader;
pub use schema::*;

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    pub shell: Option<String>,
}

impl ServerConfig {
    /// Apply overrides on top of file values
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(dir) = overrides.workspace_dir {
            self.workspace_dir = dir;
        }
        if let Some(shell) = overrides.shell {
            self.shell = shell;
        }
        self
    }
}
