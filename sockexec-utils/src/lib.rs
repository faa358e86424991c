//! sockexec-utils: Common utilities shared across sockexec crates
//!
//! This crate provides:
//! - Unified error types ([`SockexecError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{Result, SockexecError};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};

// Re-export commonly used path functions
pub use paths::{client_config_file, config_dir, log_dir, server_config_file, state_dir};
