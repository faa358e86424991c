//! Event handler trait and utilities

use tokio::sync::mpsc;

use sockexec_protocol::Message;

use super::manager::{ConnectionEvent, ConnectionStatus};

/// Trait for consuming connection events
pub trait MessageHandler: Send {
    /// Handle a message from the server
    fn handle(&mut self, msg: Message);

    /// Called on every status change
    fn on_status(&mut self, _status: ConnectionStatus) {}
}

/// Simple callback-based handler
pub struct CallbackHandler<F>
where
    F: FnMut(Message) + Send,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: FnMut(Message) + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MessageHandler for CallbackHandler<F>
where
    F: FnMut(Message) + Send,
{
    fn handle(&mut self, msg: Message) {
        (self.callback)(msg);
    }
}

/// Feed every event to `handler` until the manager goes away
pub async fn run_handler<H>(mut rx: mpsc::UnboundedReceiver<ConnectionEvent>, mut handler: H)
where
    H: MessageHandler,
{
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Message(msg) => handler.handle(msg),
            ConnectionEvent::Status(status) => handler.on_status(status),
        }
    }
}
