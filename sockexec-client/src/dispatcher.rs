//! Command dispatcher
//!
//! Executes parsed REPL commands against a [`ConnectionManager`] and renders
//! connection events to an output stream.

use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use sockexec_protocol::{FileEntry, Message, MessageType};
use sockexec_utils::Result;

use crate::commands::{parse_command, Command, ParseError, HELP};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::files::{download_target, save_download};

/// Whether the REPL should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Download waiting for its `file_data`
#[derive(Debug, Clone)]
struct PendingDownload {
    name: String,
    target: PathBuf,
}

pub struct Dispatcher<W> {
    manager: ConnectionManager,
    config: ClientConfig,
    out: W,
    pending_download: Option<PendingDownload>,
}

impl<W: Write> Dispatcher<W> {
    pub fn new(manager: ConnectionManager, config: ClientConfig, out: W) -> Self {
        Self {
            manager,
            config,
            out,
            pending_download: None,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Parse and execute one input line, reporting failures inline
    pub async fn execute_line(&mut self, line: &str) -> Result<Flow> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(ParseError::Empty) => return Ok(Flow::Continue),
            Err(e) => {
                writeln!(self.out, "[error] {}", e)?;
                return Ok(Flow::Continue);
            }
        };

        match self.execute(command).await {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(self.out, "[error] {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Execute one command
    pub async fn execute(&mut self, command: Command) -> Result<Flow> {
        debug!("Executing {:?}", command);

        match command {
            Command::Connect(target) => {
                let url = self.config.resolve_remote(&target);
                self.manager.connect(&url).await?;
            }
            Command::Disconnect => self.manager.disconnect(),
            Command::Status => {
                let url = self
                    .manager
                    .url()
                    .map(|url| url.to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    self.out,
                    "[connection] {} {} (reconnect attempts: {}/{})",
                    self.manager.status(),
                    url,
                    self.manager.reconnect_attempts(),
                    self.manager.policy().max_attempts
                )?;
            }
            Command::Exec(command_line) => self.manager.send_command(&command_line)?,
            Command::Send(text) => self.manager.send_stdin(&text)?,
            Command::Upload { path, remote_name } => {
                let name = self
                    .manager
                    .upload_file(&path, remote_name.as_deref())
                    .await?;
                writeln!(self.out, "[upload] sending {} as {}", path.display(), name)?;
            }
            Command::Download { name, target } => {
                let target = download_target(&name, target.as_deref(), &self.config.download_dir)?;
                self.manager.request_file_download(&name)?;
                if let Some(previous) = self.pending_download.replace(PendingDownload {
                    name,
                    target,
                }) {
                    warn!("Superseding pending download of {}", previous.name);
                }
            }
            Command::List => self.manager.request_file_list()?,
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => {
                self.manager.disconnect();
                return Ok(Flow::Quit);
            }
        }

        self.out.flush()?;
        Ok(Flow::Continue)
    }

    /// Render one connection event
    pub async fn handle_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Status(status) => writeln!(self.out, "[connection] {}", status)?,
            ConnectionEvent::Message(msg) => self.handle_message(msg).await?,
        }
        self.out.flush()?;
        Ok(())
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg.kind {
            MessageType::Stdout | MessageType::Stderr => write!(self.out, "{}", msg.data)?,
            MessageType::FileData => self.handle_file_data(msg).await?,
            MessageType::FileList => match msg.file_entries() {
                Ok(entries) => self.render_file_list(&entries)?,
                Err(e) => writeln!(self.out, "[error] Invalid file list: {}", e)?,
            },
            MessageType::Error => {
                // The outstanding download failed
                if msg.data.starts_with("File not found:") || msg.data.starts_with("Download failed:")
                {
                    self.pending_download = None;
                }
                writeln!(self.out, "[error] {}", msg.data)?;
            }
            kind => writeln!(self.out, "[{}] {}", kind, msg.data)?,
        }
        Ok(())
    }

    async fn handle_file_data(&mut self, msg: Message) -> Result<()> {
        let filename = msg.filename.clone().unwrap_or_default();
        let Some(pending) = self.pending_download.take() else {
            writeln!(
                self.out,
                "[file_data] {} received without a pending download, ignored",
                filename
            )?;
            return Ok(());
        };

        if pending.name != filename {
            warn!(expected = %pending.name, filename = %filename, "Download answered with another file");
        }

        match save_download(&msg, &pending.target).await {
            Ok(bytes) => writeln!(
                self.out,
                "[download] saved {} to {} ({} bytes)",
                filename,
                pending.target.display(),
                bytes
            )?,
            Err(e) => writeln!(self.out, "[error] Download of {} failed: {}", filename, e)?,
        }
        Ok(())
    }

    fn render_file_list(&mut self, entries: &[FileEntry]) -> Result<()> {
        if entries.is_empty() {
            writeln!(self.out, "(no files)")?;
            return Ok(());
        }

        let names: Vec<String> = entries
            .iter()
            .map(|e| {
                if e.is_dir() {
                    format!("{}/", e.name)
                } else {
                    e.name.clone()
                }
            })
            .collect();
        let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0).max(4);

        writeln!(self.out, "{:<width$}  {:>10}  MODIFIED", "NAME", "SIZE", width = width)?;
        for (name, entry) in names.iter().zip(entries) {
            writeln!(
                self.out,
                "{:<width$}  {:>10}  {}",
                name,
                entry.size,
                entry.modified,
                width = width
            )?;
        }
        Ok(())
    }
}
