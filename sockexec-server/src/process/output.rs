//! Child output forwarding
//!
//! One forwarder per pipe reads chunks and turns each read into a `stdout`
//! or `stderr` message on the session's outbound queue.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use sockexec_protocol::Message;

/// Read buffer size per forwarder
const READ_BUFFER_SIZE: usize = 8192;

/// Which child stream a forwarder reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn message(self, data: String) -> Message {
        match self {
            OutputStream::Stdout => Message::stdout(data),
            OutputStream::Stderr => Message::stderr(data),
        }
    }
}

/// Incremental UTF-8 decoder for pipe chunks
///
/// A multi-byte sequence split across two reads is held back until the rest
/// arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, keeping an incomplete trailing sequence for later
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&pending).into_owned())
    }
}

/// Forward a child pipe to the outbound queue until EOF
///
/// Waiting for queue capacity stops reading the pipe, which in turn blocks
/// the child once the OS pipe buffer fills.
pub async fn forward_output<R>(mut reader: R, stream: OutputStream, outbound: mpsc::Sender<Message>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8ChunkDecoder::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{:?} read error: {}", stream, e);
                break;
            }
        };

        let text = decoder.decode(&buf[..n]);
        if text.is_empty() {
            continue;
        }

        trace!(?stream, bytes = n, "forwarding output");
        if outbound.send(stream.message(text)).await.is_err() {
            // Session gone; nobody left to read
            return;
        }
    }

    if let Some(rest) = decoder.finish() {
        let _ = outbound.send(stream.message(rest)).await;
    }
}
