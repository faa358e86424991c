//! Configuration schema structs

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use sockexec_utils::{Result, SockexecError};

pub use sockexec_protocol::DEFAULT_MAX_FILE_SIZE;

/// Default listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default workspace directory, relative to the server's working directory
pub const DEFAULT_WORKSPACE_DIR: &str = "./websocket_files";

/// Default number of messages queued per session
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Root server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub listen: String,
    /// Directory holding uploaded files
    pub workspace_dir: PathBuf,
    /// Shell used to run command lines
    pub shell: String,
    /// Largest file accepted for upload or served for download, in bytes
    pub max_file_size: u64,
    /// Messages queued per session before output forwarding pauses
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.into(),
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            shell: default_shell().into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Parse the listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            SockexecError::config(format!("invalid listen address '{}': {}", self.listen, e))
        })
    }

    /// Largest WebSocket message the listener accepts
    pub fn max_message_size(&self) -> usize {
        sockexec_protocol::max_message_size(self.max_file_size)
    }
}

#[cfg(windows)]
fn default_shell() -> &'static str {
    "cmd"
}

#[cfg(not(windows))]
fn default_shell() -> &'static str {
    "/bin/sh"
}
