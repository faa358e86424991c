//! WebSocket listener
//!
//! Accepts TCP connections, performs the WebSocket handshake and hands each
//! connection to [`serve_connection`] on its own task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, warn};

use sockexec_protocol::{Message, Transport};
use sockexec_utils::{Result, SockexecError};

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::files::FileStore;
use crate::process::ProcessConfig;
use crate::registry::ClientRegistry;

/// How long shutdown waits for the notice to be queued everywhere
const SHUTDOWN_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long shutdown waits for connection tasks to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// State shared by every connection
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: ClientRegistry,
    pub files: Arc<FileStore>,
    pub process: ProcessConfig,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let files = Arc::new(FileStore::new(
            config.workspace_dir.clone(),
            config.max_file_size,
        ));
        let process = ProcessConfig::new(config.shell.clone());

        Self {
            config,
            registry: ClientRegistry::new(),
            files,
            process,
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let max = self.config.max_message_size();
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max);
        ws_config.max_frame_size = Some(max);
        ws_config
    }
}

/// Handle for stopping a running [`Server`]
#[derive(Clone)]
pub struct ShutdownHandle {
    ctx: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Notify every client, then stop accepting and close all connections
    pub async fn shutdown(&self) {
        let notice = Message::status("Server shutting down");
        match tokio::time::timeout(SHUTDOWN_NOTICE_TIMEOUT, self.ctx.registry.broadcast(&notice))
            .await
        {
            Ok(count) => info!("Shutdown notice queued for {} clients", count),
            Err(_) => warn!("Timed out queueing shutdown notice"),
        }

        // No receivers simply means nothing is running
        let _ = self.shutdown_tx.send(());
    }
}

/// Bound, not yet running server
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at bind time so an early shutdown is not missed
    shutdown_rx: broadcast::Receiver<()>,
}

impl Server {
    /// Prepare the workspace and bind the listen address
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr()?;
        let ctx = Arc::new(ServerContext::new(config));
        ctx.files.init().await?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SockexecError::connection(format!("failed to bind {}: {}", addr, e)))?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            listener,
            ctx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            ctx: Arc::clone(&self.ctx),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Run until `signal` resolves, then shut down gracefully
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.shutdown_handle();
        tokio::spawn(async move {
            signal.await;
            handle.shutdown().await;
        });
        self.run().await
    }

    /// Accept connections until a shutdown is requested
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("sockexec server listening on ws://{}", addr);
        info!("Workspace: {}", self.ctx.files.root().display());

        let mut shutdown_rx = self.shutdown_rx;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("New TCP connection from {}", peer_addr);
                            let ctx = Arc::clone(&self.ctx);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            connections.spawn(accept_websocket(stream, peer_addr, ctx, shutdown_rx));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        drop(self.listener);
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Connections still open after grace period, aborting");
            connections.abort_all();
        }

        info!("sockexec server stopped");
        Ok(())
    }
}

async fn accept_websocket(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ctx.websocket_config()))
        .await
    {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };

    info!("Connection from {}", peer_addr);
    serve_connection(Transport::from_websocket(ws), ctx, shutdown_rx).await;
}
