//! Connection manager
//!
//! Owns the client side of one logical connection: the current transport,
//! its status and the reconnect schedule. Everything the server sends, plus
//! every status change, is delivered on a single [`ConnectionEvent`]
//! channel.
//!
//! Each `connect` or `disconnect` bumps an epoch. Transports and reconnect
//! timers remember the epoch they were created under and are ignored once it
//! moves on, so a stale close can never tear down a newer connection.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use sockexec_protocol::{decode_payload, Message, Transport};
use sockexec_utils::{Result, SockexecError};

use super::factory::TransportFactory;
use crate::files::read_upload;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Status changed
    Status(ConnectionStatus),
    /// Message received (or synthesized from an unparseable frame)
    Message(Message),
}

/// Linear reconnect backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnects allowed without an intervening successful open
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Why the transport task stopped
enum DriveOutcome {
    /// Torn down locally
    Cancelled,
    /// Peer closed the connection
    Closed,
    /// Transport failed
    Failed(SockexecError),
}

struct State {
    url: Option<Url>,
    status: ConnectionStatus,
    attempts: u32,
    epoch: u64,
    /// Frames for the transport task; present only while connected
    outbound: Option<mpsc::UnboundedSender<String>>,
    io_cancel: Option<CancellationToken>,
    reconnect: Option<JoinHandle<()>>,
}

impl State {
    /// Drop the current transport and any pending reconnect
    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
        if let Some(cancel) = self.io_cancel.take() {
            cancel.cancel();
        }
        self.outbound = None;
    }
}

struct Inner {
    factory: Arc<dyn TransportFactory>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Mutex<State>,
}

/// Client connection with automatic reconnection
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            factory,
            policy,
            events,
            state: Mutex::new(State {
                url: None,
                status: ConnectionStatus::Disconnected,
                attempts: 0,
                epoch: 0,
                outbound: None,
                io_cancel: None,
                reconnect: None,
            }),
        });
        (Self { inner }, rx)
    }

    /// Connect to `url`, replacing any current connection
    ///
    /// A failed open is returned and also schedules a reconnect.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let url = Url::parse(url).map_err(|e| SockexecError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Arc::clone(&self.inner).open(url).await
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.teardown();
        state.attempts = 0;
        self.inner.set_status(&mut state, ConnectionStatus::Disconnected);
        info!("Disconnected");
    }

    /// Serialize and transmit a message
    ///
    /// Fails immediately unless connected; nothing is queued for later.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let frame = msg
            .to_frame()
            .map_err(|e| SockexecError::protocol(e.to_string()))?;

        let state = self.inner.state.lock();
        if state.status != ConnectionStatus::Connected {
            return Err(SockexecError::NotConnected);
        }
        let outbound = state.outbound.as_ref().ok_or(SockexecError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| SockexecError::ConnectionClosed)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Target of the current or last connection
    pub fn url(&self) -> Option<Url> {
        self.inner.state.lock().url.clone()
    }

    /// Reconnects attempted since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    // ==================== Message helpers ====================

    pub fn send_stdin(&self, data: &str) -> Result<()> {
        self.send(&Message::stdin(data))
    }

    pub fn send_command(&self, command_line: &str) -> Result<()> {
        self.send(&Message::command(command_line))
    }

    /// Send already-encoded file content
    ///
    /// `fileSize` is the length of the raw content.
    pub fn send_file_upload(&self, filename: &str, content: &str, is_base64: bool) -> Result<()> {
        let size = decode_payload(content, is_base64)
            .map_err(|e| SockexecError::InvalidMessage(e.to_string()))?
            .len() as u64;
        self.send(&Message::file_upload(filename, content, size, is_base64))
    }

    pub fn request_file_download(&self, filename: &str) -> Result<()> {
        self.send(&Message::file_download(filename))
    }

    pub fn request_file_list(&self) -> Result<()> {
        self.send(&Message::list_files())
    }

    /// Read, classify and upload a local file
    ///
    /// Returns the name the file is stored under on the server.
    pub async fn upload_file(&self, path: &Path, remote_name: Option<&str>) -> Result<String> {
        if !self.is_connected() {
            return Err(SockexecError::NotConnected);
        }
        let msg = read_upload(path, remote_name).await?;
        let filename = msg.filename.clone().unwrap_or_default();
        self.send(&msg)?;
        Ok(filename)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.teardown();
    }
}

impl Inner {
    fn set_status(&self, state: &mut State, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        debug!(from = %state.status, to = %status, "Connection status changed");
        state.status = status;
        let _ = self.events.send(ConnectionEvent::Status(status));
    }

    async fn open(self: Arc<Self>, url: Url) -> Result<()> {
        let epoch = {
            let mut state = self.state.lock();
            state.teardown();
            state.epoch += 1;
            state.url = Some(url.clone());
            self.set_status(&mut state, ConnectionStatus::Connecting);
            state.epoch
        };

        info!("Connecting to {}", url);
        let result = self.factory.connect(&url).await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!("Connection attempt to {} superseded", url);
            return Err(SockexecError::connection("connection attempt superseded"));
        }

        match result {
            Ok(transport) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let cancel = CancellationToken::new();
                state.attempts = 0;
                state.outbound = Some(tx);
                state.io_cancel = Some(cancel.clone());
                self.set_status(&mut state, ConnectionStatus::Connected);
                drop(state);

                info!("Connected to {}", url);
                tokio::spawn(Arc::clone(&self).drive(transport, rx, cancel, epoch));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", url, e);
                self.set_status(&mut state, ConnectionStatus::Error);
                // A failed open counts as a close
                self.set_status(&mut state, ConnectionStatus::Disconnected);
                self.schedule_reconnect(&mut state);
                Err(SockexecError::connection(format!(
                    "failed to connect to {}: {}",
                    url, e
                )))
            }
        }
    }

    /// Boxed so the reconnect timer can call back into `open`
    fn open_boxed(self: Arc<Self>, url: Url) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.open(url))
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) {
        if state.attempts >= self.policy.max_attempts {
            info!(
                "Giving up after {} reconnect attempts",
                self.policy.max_attempts
            );
            return;
        }
        let Some(url) = state.url.clone() else {
            return;
        };

        state.attempts += 1;
        let attempt = state.attempts;
        let delay = self.policy.delay(attempt);
        let epoch = state.epoch;
        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay, attempt, self.policy.max_attempts
        );

        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                // Detach so the open below does not abort this task
                state.reconnect = None;
            }
            let _ = inner.open_boxed(url).await;
        });

        if let Some(previous) = state.reconnect.replace(timer) {
            previous.abort();
        }
    }

    /// Pump frames between the transport and the manager
    async fn drive(
        self: Arc<Self>,
        transport: Transport,
        mut outbound: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        let (mut sink, mut stream) = transport.into_parts();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break DriveOutcome::Cancelled,
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            break DriveOutcome::Failed(SockexecError::transport(e.to_string()));
                        }
                    }
                    None => break DriveOutcome::Cancelled,
                },
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.deliver(&frame),
                    Some(Err(e)) => {
                        break DriveOutcome::Failed(SockexecError::transport(e.to_string()))
                    }
                    None => break DriveOutcome::Closed,
                },
            }
        };

        match outcome {
            DriveOutcome::Cancelled => {
                // Close handshake; the peer sees a clean close
                if let Err(e) = sink.close().await {
                    debug!("Close failed: {}", e);
                }
            }
            DriveOutcome::Closed => {
                info!("Server closed the connection");
                self.transport_closed(epoch, false);
            }
            DriveOutcome::Failed(e) => {
                warn!("Connection lost: {}", e);
                self.transport_closed(epoch, true);
            }
        }
    }

    fn deliver(&self, frame: &str) {
        let msg = match Message::from_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Unparseable frame: {}", e);
                Message::error(format!("Invalid message format: {}", frame))
            }
        };
        let _ = self.events.send(ConnectionEvent::Message(msg));
    }

    fn transport_closed(self: &Arc<Self>, epoch: u64, failed: bool) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return;
        }

        state.outbound = None;
        state.io_cancel = None;
        if failed {
            self.set_status(&mut state, ConnectionStatus::Error);
        }
        self.set_status(&mut state, ConnectionStatus::Disconnected);
        self.schedule_reconnect(&mut state);
    }
}
