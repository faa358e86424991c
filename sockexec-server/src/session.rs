//! Server session
//!
//! One [`Session`] per accepted connection. It routes every inbound frame by
//! message kind to the process supervisor or the file store and queues the
//! replies on the session's outbound queue. Frames are handled one at a time
//! in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sockexec_protocol::{Message, MessageType};
use sockexec_utils::SockexecError;

use crate::files::FileStore;
use crate::process::{ProcessConfig, ProcessSupervisor};
use crate::registry::ClientId;

/// Longest command/data excerpt written to the log
const LOG_EXCERPT_LEN: usize = 50;

/// Server-side state of one connection
pub struct Session {
    client_id: ClientId,
    files: Arc<FileStore>,
    supervisor: ProcessSupervisor,
    outbound: mpsc::Sender<Message>,
}

impl Session {
    pub fn new(
        client_id: ClientId,
        files: Arc<FileStore>,
        process_config: ProcessConfig,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            client_id,
            files,
            supervisor: ProcessSupervisor::new(process_config, outbound.clone()),
            outbound,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Whether a command is currently running
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Queue the greeting sent right after accept
    pub async fn welcome(&self) {
        self.reply(Message::status(format!(
            "Connected to sockexec server. Client ID: {}",
            self.client_id
        )))
        .await;
    }

    /// Parse and handle one inbound frame
    pub async fn handle_frame(&mut self, frame: &str) {
        match Message::from_frame(frame) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                warn!(client = %self.client_id, "Message parsing error: {}", e);
                self.reply(Message::error(format!("Message parsing error: {}", e)))
                    .await;
            }
        }
    }

    /// Route one message by kind
    pub async fn handle_message(&mut self, msg: Message) {
        debug!(
            client = %self.client_id,
            kind = %msg.kind,
            "received: {}",
            excerpt(&msg.data)
        );

        match msg.kind {
            MessageType::Command => self.handle_command(&msg.data).await,
            MessageType::Stdin => self.supervisor.write_stdin(&msg.data),
            MessageType::FileUpload => self.handle_upload(msg).await,
            MessageType::FileDownload => self.handle_download(msg).await,
            MessageType::ListFiles => self.handle_list().await,
            other => {
                self.reply(Message::error(format!("Unsupported message type: {}", other)))
                    .await;
            }
        }
    }

    /// Kill any running command and stop accepting work
    pub async fn close(&mut self) {
        if self.supervisor.is_running() {
            info!(client = %self.client_id, "Killing running process");
        }
        self.supervisor.stop().await;
    }

    async fn handle_command(&mut self, command_line: &str) {
        if command_line.trim().is_empty() {
            self.reply(Message::error("Command is empty")).await;
            return;
        }

        info!(client = %self.client_id, command = %command_line, "Executing");
        self.supervisor.run_command(command_line).await;
    }

    async fn handle_upload(&mut self, msg: Message) {
        let filename = msg.filename.clone().unwrap_or_default();
        let result = self
            .files
            .save(&filename, &msg.data, msg.is_base64(), msg.file_size)
            .await;

        let reply = match result {
            Ok(bytes) => {
                info!(client = %self.client_id, filename = %filename, bytes, "Upload complete");
                Message::status(format!(
                    "File uploaded successfully: {} ({} bytes)",
                    filename, bytes
                ))
            }
            Err(e) => {
                warn!(client = %self.client_id, filename = %filename, "Upload failed: {}", e);
                Message::error(format!("Upload failed: {}", e))
            }
        };
        self.reply(reply).await;
    }

    async fn handle_download(&mut self, msg: Message) {
        let filename = msg.filename.unwrap_or(msg.data);

        let reply = match self.files.load(&filename).await {
            Ok(payload) => {
                info!(
                    client = %self.client_id,
                    filename = %filename,
                    bytes = payload.size,
                    "Download complete"
                );
                Message::file_data(filename, payload.data, payload.size, payload.is_base64)
            }
            Err(e @ SockexecError::FileNotFound(_)) => {
                info!(client = %self.client_id, filename = %filename, "File not found");
                Message::error(e.to_string())
            }
            Err(e) => {
                warn!(client = %self.client_id, filename = %filename, "Download failed: {}", e);
                Message::error(format!("Download failed: {}", e))
            }
        };
        self.reply(reply).await;
    }

    async fn handle_list(&mut self) {
        let listing = match self.files.list().await {
            Ok(entries) => {
                debug!(client = %self.client_id, "Listed {} files", entries.len());
                Message::file_list(&entries).map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let reply = listing.unwrap_or_else(|e| {
            warn!(client = %self.client_id, "Failed to list files: {}", e);
            Message::error(format!("Failed to list files: {}", e))
        });
        self.reply(reply).await;
    }

    async fn reply(&self, msg: Message) {
        if self.outbound.send(msg).await.is_err() {
            debug!(client = %self.client_id, "Outbound queue closed, dropping reply");
        }
    }
}

fn excerpt(data: &str) -> String {
    let mut chars = data.chars();
    let head: String = chars.by_ref().take(LOG_EXCERPT_LEN).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
