//! Wire message envelope
//!
//! Every frame on the wire is exactly one JSON object:
//!
//! ```json
//! { "type": "file_data", "data": "aGVsbG8=", "timestamp": 1714560000000,
//!   "filename": "logo.png", "fileSize": 5, "isBase64": true }
//! ```
//!
//! There is no request/response correlation id. A `file_download` request is
//! answered by the next `file_data` message on the same connection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::FileEntry;

/// Kind of a message, carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Input for the running command (client -> server)
    Stdin,
    /// Standard output chunk of the running command (server -> client)
    Stdout,
    /// Standard error chunk of the running command (server -> client)
    Stderr,
    /// Command line to run through the server's shell (client -> server)
    Command,
    /// Informational notice: welcome, exit codes, upload results
    Status,
    /// Failure report for one operation; never fatal to the session
    Error,
    /// File content pushed to the server workspace
    FileUpload,
    /// Request for a file from the server workspace
    FileDownload,
    /// File content answering a `file_download`
    FileData,
    /// Request for a workspace listing
    ListFiles,
    /// Workspace listing; `data` holds a JSON array of [`FileEntry`]
    FileList,
}

impl MessageType {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Stdin => "stdin",
            MessageType::Stdout => "stdout",
            MessageType::Stderr => "stderr",
            MessageType::Command => "command",
            MessageType::Status => "status",
            MessageType::Error => "error",
            MessageType::FileUpload => "file_upload",
            MessageType::FileDownload => "file_download",
            MessageType::FileData => "file_data",
            MessageType::ListFiles => "list_files",
            MessageType::FileList => "file_list",
        }
    }

    /// Whether messages of this kind must carry a `filename`
    pub fn requires_filename(&self) -> bool {
        matches!(
            self,
            MessageType::FileUpload | MessageType::FileDownload | MessageType::FileData
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level error
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{kind} message is missing a filename")]
    MissingFilename { kind: MessageType },

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("expected a {expected} message, got {actual}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },
}

/// One message on the wire
///
/// Messages are immutable once sent. Optional fields are omitted from the
/// JSON when absent, and an absent `isBase64` means the payload is text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub data: String,
    /// Producer-side instant, milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_base64: Option<bool>,
}

impl Message {
    /// Create a message of the given kind stamped with the current time
    pub fn new(kind: MessageType, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp: now_millis(),
            filename: None,
            file_size: None,
            is_base64: None,
        }
    }

    pub fn stdin(data: impl Into<String>) -> Self {
        Self::new(MessageType::Stdin, data)
    }

    pub fn stdout(data: impl Into<String>) -> Self {
        Self::new(MessageType::Stdout, data)
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self::new(MessageType::Stderr, data)
    }

    pub fn command(command_line: impl Into<String>) -> Self {
        Self::new(MessageType::Command, command_line)
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::new(MessageType::Status, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageType::Error, text)
    }

    /// File content sent to the server
    pub fn file_upload(
        filename: impl Into<String>,
        data: impl Into<String>,
        file_size: u64,
        is_base64: bool,
    ) -> Self {
        Self {
            filename: Some(filename.into()),
            file_size: Some(file_size),
            is_base64: Some(is_base64),
            ..Self::new(MessageType::FileUpload, data)
        }
    }

    /// Download request; the filename travels in both `filename` and `data`
    pub fn file_download(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            filename: Some(filename.clone()),
            ..Self::new(MessageType::FileDownload, filename)
        }
    }

    /// File content answering a download request
    pub fn file_data(
        filename: impl Into<String>,
        data: impl Into<String>,
        file_size: u64,
        is_base64: bool,
    ) -> Self {
        Self {
            filename: Some(filename.into()),
            file_size: Some(file_size),
            is_base64: Some(is_base64),
            ..Self::new(MessageType::FileData, data)
        }
    }

    pub fn list_files() -> Self {
        Self::new(MessageType::ListFiles, "")
    }

    /// Workspace listing; entries are embedded as a JSON array in `data`
    pub fn file_list(entries: &[FileEntry]) -> Result<Self, ProtocolError> {
        let data = serde_json::to_string(entries)?;
        Ok(Self::new(MessageType::FileList, data))
    }

    /// Whether `data` is base64-encoded binary (absent flag means text)
    pub fn is_base64(&self) -> bool {
        self.is_base64.unwrap_or(false)
    }

    /// Parse the entries of a `file_list` message
    pub fn file_entries(&self) -> Result<Vec<FileEntry>, ProtocolError> {
        if self.kind != MessageType::FileList {
            return Err(ProtocolError::UnexpectedType {
                expected: MessageType::FileList,
                actual: self.kind,
            });
        }
        Ok(serde_json::from_str(&self.data)?)
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.kind.requires_filename() && self.filename.as_deref().map_or(true, str::is_empty) {
            return Err(ProtocolError::MissingFilename { kind: self.kind });
        }
        Ok(())
    }

    /// Serialize into a single frame
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a single frame
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        let msg: Message = serde_json::from_str(frame)?;
        msg.validate()?;
        Ok(msg)
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
