//! sockexec-server: remote command execution and file transfer
//!
//! Every accepted WebSocket connection gets a [`Session`] with its own
//! [`ProcessSupervisor`] and shared access to the workspace [`FileStore`].

pub mod config;
pub mod connection;
pub mod files;
pub mod listener;
pub mod process;
pub mod registry;
pub mod session;

pub use config::{ConfigLoader, ConfigOverrides, ServerConfig};
pub use connection::{serve_connection, CloseReason};
pub use files::{validate_filename, FileStore};
pub use listener::{Server, ServerContext, ShutdownHandle};
pub use process::{ProcessConfig, ProcessSupervisor};
pub use registry::{ClientId, ClientRegistry};
pub use session::Session;
