//! sockexec-protocol: Shared wire definitions for client-server communication
//!
//! This crate defines the message envelope exchanged between the sockexec
//! client and server, the text/binary classification both ends agree on,
//! and the frame transports (WebSocket or newline-framed byte streams) that
//! carry those messages.

pub mod classify;
pub mod codec;
pub mod messages;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use classify::{
    classify, decode_payload, encode_payload, max_message_size, EncodedPayload, PayloadKind,
    CLASSIFIER_VERSION, DEFAULT_MAX_FILE_SIZE, TEXT_EXTENSIONS,
};
pub use codec::{CodecError, FrameCodec, MAX_FRAME_SIZE};
pub use messages::{Message, MessageType, ProtocolError};
pub use transport::{FrameSink, FrameStream, Transport, TransportError};
pub use types::{FileEntry, FileKind};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
