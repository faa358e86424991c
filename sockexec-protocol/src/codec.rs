//! Frame codec for byte-stream transports
//!
//! WebSockets frame messages natively. Plain byte streams (in-process pipes,
//! TCP) use this codec instead: one frame per line. Serialized messages
//! never contain a raw newline because JSON escapes it inside strings.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Frame contains an embedded newline")]
    EmbeddedNewline,
}

/// Newline-delimited frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    /// Bytes already scanned for a newline in the current buffer
    scanned: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn take_frame(&mut self, src: &mut BytesMut, len: usize) -> Result<String, CodecError> {
        self.scanned = 0;
        let mut line = src.split_to(len);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        String::from_utf8(line.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let len = self.scanned + offset;
                    if len > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge {
                            size: len,
                            max: self.max_frame_size,
                        });
                    }

                    let frame = self.take_frame(src, len)?;
                    // Drop the newline itself
                    src.advance(1);

                    // Blank lines carry no frame
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    if src.len() > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge {
                            size: src.len(),
                            max: self.max_frame_size,
                        });
                    }
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Peer closed without a trailing newline
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len();
        let frame = self.take_frame(src, len)?;
        Ok(if frame.is_empty() { None } else { Some(frame) })
    }
}

impl Encoder<String> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        if item.contains('\n') {
            return Err(CodecError::EmbeddedNewline);
        }

        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
