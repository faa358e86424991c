//! Text/binary classification of file payloads
//!
//! Both ends use this module. Senders classify a payload once and record the
//! decision in `isBase64`; receivers trust that flag instead of re-deriving
//! it, so a change to the extension list can never make the two sides
//! disagree about an in-flight payload.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::messages::ProtocolError;

/// Bumped whenever [`TEXT_EXTENSIONS`] changes
pub const CLASSIFIER_VERSION: u32 = 1;

/// Default upload/download size limit shared by both ends (64 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Headroom on top of a base64-inflated payload for the JSON envelope
const FRAME_OVERHEAD: usize = 64 * 1024;

/// Extensions (lowercase, without the dot) whose content travels as text
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "js", "ts", "tsx", "jsx", "css", "html", "xml", "csv", "yml", "yaml",
    "conf", "ini", "log", "py", "java", "cpp", "c", "h",
];

/// How a payload travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Raw UTF-8 text in `data`
    Text,
    /// Base64 in `data`, `isBase64 = true`
    Binary,
}

/// Classify a filename by its extension
pub fn classify(filename: &str) -> PayloadKind {
    let is_text = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            TEXT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false);

    if is_text {
        PayloadKind::Text
    } else {
        PayloadKind::Binary
    }
}

/// Payload ready to be placed in a `file_upload` or `file_data` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: String,
    pub is_base64: bool,
    /// Length of the raw content in bytes
    pub size: u64,
}

/// Encode file content for transmission
///
/// Text-classified files that are not valid UTF-8 fall back to base64 so the
/// bytes survive the trip unchanged.
pub fn encode_payload(filename: &str, bytes: &[u8]) -> EncodedPayload {
    let size = bytes.len() as u64;

    if classify(filename) == PayloadKind::Text {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return EncodedPayload {
                data: text.to_string(),
                is_base64: false,
                size,
            };
        }
    }

    EncodedPayload {
        data: STANDARD.encode(bytes),
        is_base64: true,
        size,
    }
}

/// Largest message needed to carry a file of `max_file_size` bytes
///
/// Binary payloads grow by a third once base64-encoded.
pub fn max_message_size(max_file_size: u64) -> usize {
    let encoded = max_file_size.saturating_mul(4) / 3 + 4;
    usize::try_from(encoded)
        .unwrap_or(usize::MAX)
        .saturating_add(FRAME_OVERHEAD)
}

/// Decode a payload back to raw bytes
pub fn decode_payload(data: &str, is_base64: bool) -> Result<Vec<u8>, ProtocolError> {
    if is_base64 {
        Ok(STANDARD.decode(data.trim())?)
    } else {
        Ok(data.as_bytes().to_vec())
    }
}
