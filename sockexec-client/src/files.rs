//! Client side of file transfer
//!
//! Turns local files into `file_upload` messages and `file_data` messages
//! back into local files. Classification uses the shared protocol encoder;
//! received payloads are decoded according to their `isBase64` flag only.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use sockexec_protocol::{decode_payload, encode_payload, Message, MessageType};
use sockexec_utils::{Result, SockexecError};

/// Read `path` and build the upload message for it
///
/// The file is stored remotely as `remote_name`, or under its own file name
/// when none is given.
pub async fn read_upload(path: &Path, remote_name: Option<&str>) -> Result<Message> {
    let filename = match remote_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| SockexecError::InvalidFilename(path.display().to_string()))?,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| SockexecError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    let payload = encode_payload(&filename, &bytes);
    debug!(
        filename = %filename,
        bytes = payload.size,
        base64 = payload.is_base64,
        "Prepared upload"
    );
    Ok(Message::file_upload(
        filename,
        payload.data,
        payload.size,
        payload.is_base64,
    ))
}

/// Where a downloaded file should be written
///
/// An explicit target wins; otherwise the file lands in `download_dir` under
/// the last component of the name the server reported.
pub fn download_target(filename: &str, target: Option<&Path>, download_dir: &Path) -> Result<PathBuf> {
    if let Some(target) = target {
        return Ok(target.to_path_buf());
    }

    let name = Path::new(filename)
        .file_name()
        .ok_or_else(|| SockexecError::InvalidFilename(filename.to_string()))?;
    Ok(download_dir.join(name))
}

/// Decode a `file_data` message and write it to `target`
///
/// Returns the number of bytes written.
pub async fn save_download(msg: &Message, target: &Path) -> Result<u64> {
    if msg.kind != MessageType::FileData {
        return Err(SockexecError::InvalidMessage(format!(
            "expected file_data, got {}",
            msg.kind
        )));
    }

    let bytes = decode_payload(&msg.data, msg.is_base64())
        .map_err(|e| SockexecError::InvalidMessage(e.to_string()))?;
    let size = bytes.len() as u64;
    if let Some(declared) = msg.file_size {
        if declared != size {
            warn!(declared, actual = size, "Downloaded size differs from fileSize");
        }
    }

    tokio::fs::write(target, &bytes)
        .await
        .map_err(|source| SockexecError::FileWrite {
            path: target.to_path_buf(),
            source,
        })?;
    Ok(size)
}
