//! Transport factories
//!
//! The connection manager never opens sockets itself. It asks a
//! [`TransportFactory`] for a fresh [`Transport`] on every (re)connect, so
//! tests and alternate transports plug in without touching protocol logic.

use std::future::Future;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use url::Url;

use sockexec_protocol::{Transport, TransportError};

/// Opens one transport to a URL
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError>;
}

/// `ws://` and `wss://` transports via tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory {
    max_message_size: Option<usize>,
}

impl WebSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the size of inbound messages
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = Some(max);
        self
    }

    fn websocket_config(&self) -> Option<WebSocketConfig> {
        let max = self.max_message_size?;
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(max);
        config.max_frame_size = Some(max);
        Some(config)
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError> {
        match url.scheme() {
            "ws" | "wss" => {}
            _ => return Err(TransportError::UnsupportedUrl(url.to_string())),
        }

        let (ws, response) = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            self.websocket_config(),
            false,
        )
        .await?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Transport::from_websocket(ws))
    }
}

/// Factory backed by an async function
pub struct FnFactory<F> {
    f: F,
}

/// Build a factory from an async function of the target URL
pub fn factory_fn<F, Fut>(f: F) -> FnFactory<F>
where
    F: Fn(Url) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Transport, TransportError>> + Send + 'static,
{
    FnFactory { f }
}

#[async_trait]
impl<F, Fut> TransportFactory for FnFactory<F>
where
    F: Fn(Url) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Transport, TransportError>> + Send + 'static,
{
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError> {
        (self.f)(url.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_websocket_factory_rejects_other_schemes() {
        let url = Url::parse("http://127.0.0.1:8080").unwrap();
        let result = WebSocketFactory::new().connect(&url).await;
        assert!(matches!(result, Err(TransportError::UnsupportedUrl(_))));
    }

    #[tokio::test]
    async fn test_websocket_factory_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}", addr)).unwrap();
        assert!(WebSocketFactory::new().connect(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_factory_fn_receives_url() {
        let factory = factory_fn(|url: Url| async move {
            assert_eq!(url.as_str(), "ws://example.test/");
            let (client, _server) = tokio::io::duplex(64);
            Ok(Transport::from_io(client))
        });

        let url = Url::parse("ws://example.test").unwrap();
        assert!(factory.connect(&url).await.is_ok());
    }
}
