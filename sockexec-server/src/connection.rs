//! Per-connection driver
//!
//! Owns the transport of one client: a writer task drains the session's
//! outbound queue into the sink while this task feeds inbound frames to the
//! [`Session`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, info_span, warn, Instrument};

use sockexec_protocol::{FrameSink, Message, Transport};

use crate::listener::ServerContext;
use crate::session::Session;

/// How long a shutting-down connection may take to flush its queue
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection
    PeerClosed,
    /// Reading from the transport failed
    TransportError,
    /// The server is shutting down
    Shutdown,
}

/// Serve one connected client until it disconnects or the server shuts down
pub async fn serve_connection(
    transport: Transport,
    ctx: Arc<ServerContext>,
    shutdown_rx: broadcast::Receiver<()>,
) -> CloseReason {
    let (tx, rx) = mpsc::channel(ctx.config.outbound_buffer);
    let client_id = ctx.registry.register_client(tx.clone());
    let span = info_span!("session", client = %client_id);

    async move {
        info!("{} connected", client_id);
        let (sink, mut stream) = transport.into_parts();
        let writer = tokio::spawn(write_loop(sink, rx).in_current_span());

        let mut session = Session::new(
            client_id,
            Arc::clone(&ctx.files),
            ctx.process.clone(),
            tx,
        );
        session.welcome().await;

        let mut shutdown_rx = shutdown_rx;
        let reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => session.handle_frame(&frame).await,
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::PeerClosed,
                },
                _ = shutdown_rx.recv() => break CloseReason::Shutdown,
            }
        };

        ctx.registry.unregister_client(client_id);

        match reason {
            CloseReason::Shutdown => {
                // Flush what is queued, then close the transport
                session.close().await;
                drop(session);
                if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
                    warn!("Timed out flushing outbound queue");
                }
            }
            CloseReason::PeerClosed | CloseReason::TransportError => {
                // Nothing may reach the closed socket
                writer.abort();
                session.close().await;
            }
        }

        info!("{} disconnected ({:?})", client_id, reason);
        reason
    }
    .instrument(span)
    .await
}

/// Drain the outbound queue into the transport
async fn write_loop(mut sink: FrameSink, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {} message: {}", msg.kind, e);
                continue;
            }
        };

        if let Err(e) = sink.send(frame).await {
            debug!("Write failed: {}", e);
            return;
        }
    }

    // Every sender is gone; close gracefully
    if let Err(e) = sink.close().await {
        debug!("Close failed: {}", e);
    }
}
