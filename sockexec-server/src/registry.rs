//! Client Connection Registry
//!
//! Assigns client ids and keeps a sender per connected client so the server
//! can reach every session at once (shutdown notice).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sockexec_protocol::Message;

/// Unique client identifier, displayed as `Client-N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a new ClientId from a raw value (mainly for testing)
    #[cfg(test)]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client-{}", self.0)
    }
}

/// Registry tracking all connected clients
///
/// Thread-safe for concurrent access from multiple connection tasks.
pub struct ClientRegistry {
    /// Client ID -> outbound queue of that client's session
    clients: DashMap<ClientId, mpsc::Sender<Message>>,
    /// Counter for generating client IDs; the first client is `Client-1`
    next_client_id: AtomicU64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Create a new empty client registry
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Register a new client connection
    pub fn register_client(&self, sender: mpsc::Sender<Message>) -> ClientId {
        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::SeqCst));
        self.clients.insert(id, sender);
        debug!("Registered client {}", id);
        id
    }

    /// Unregister a client connection
    pub fn unregister_client(&self, client_id: ClientId) {
        if self.clients.remove(&client_id).is_some() {
            debug!("Unregistered client {}", client_id);
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether a client is registered
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Queue a message for every connected client
    ///
    /// Waits for queue capacity per client. Returns the number of clients
    /// the message was queued for.
    pub async fn broadcast(&self, message: &Message) -> usize {
        // Collect first so no map guard is held across an await
        let senders: Vec<(ClientId, mpsc::Sender<Message>)> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (client_id, sender) in senders {
            match sender.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Client {} closed before broadcast", client_id),
            }
        }
        delivered
    }
}
