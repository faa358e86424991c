//! sockexec-client: client side of sockexec
//!
//! The [`ConnectionManager`] keeps one reconnecting connection to a server
//! and reports everything it receives on a typed event channel. The
//! [`Dispatcher`] drives it from parsed REPL commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod files;

pub use commands::{parse_command, Command, ParseError};
pub use config::ClientConfig;
pub use connection::{
    factory_fn, run_handler, CallbackHandler, ConnectionEvent, ConnectionManager,
    ConnectionStatus, MessageHandler, ReconnectPolicy, TransportFactory, WebSocketFactory,
};
pub use dispatcher::{Dispatcher, Flow};
