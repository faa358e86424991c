//! Frame transports
//!
//! A [`Transport`] is a pair of boxed halves that move whole frames: a sink
//! accepting serialized messages and a stream yielding them. Session and
//! connection logic only ever sees these halves, so WebSockets, in-process
//! pipes and plain TCP streams are interchangeable.

use std::pin::Pin;

use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::Framed;

use crate::codec::{CodecError, FrameCodec};

/// Transport-level error
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unsupported transport URL: {0}")]
    UnsupportedUrl(String),

    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Outbound half: accepts one serialized message per item
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields one serialized message per item
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A connected, frame-oriented transport
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    /// Wrap an established WebSocket
    ///
    /// Frames travel as text messages. Binary messages are accepted when they
    /// hold UTF-8; ping, pong and close are handled by tungstenite and never
    /// surface as frames.
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let sink = sink.with(|frame: String| {
            future::ready(Ok::<_, TransportError>(WsMessage::Text(frame)))
        });

        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => {
                    Some(String::from_utf8(bytes).map_err(|_| TransportError::InvalidUtf8))
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// Wrap a byte stream using newline-delimited frames
    pub fn from_io<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_io_with_codec(io, FrameCodec::new())
    }

    pub fn from_io_with_codec<T>(io: T, codec: FrameCodec) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(io, codec).split();
        let sink = sink.sink_map_err(TransportError::from);
        let stream = stream.map(|item| item.map_err(TransportError::from));
        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// Split into the two halves
    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
