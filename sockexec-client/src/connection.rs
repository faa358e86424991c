//! Client-server connection management
//!
//! Provides a reconnecting connection to a sockexec server with a typed
//! event channel for everything it receives.

mod factory;
mod handler;
mod manager;

pub use factory::{factory_fn, FnFactory, TransportFactory, WebSocketFactory};
pub use handler::{run_handler, CallbackHandler, MessageHandler};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionStatus, ReconnectPolicy};
