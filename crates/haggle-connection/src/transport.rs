//! The dial/read/write seam between the supervisor and the network.
//!
//! The supervisor never touches tungstenite directly. It asks a
//! [`TransportConnector`] for a fresh connection and gets back a split
//! writer/reader pair, so reads can sit in a `select!` branch while the
//! writer serves the other branches.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use haggle_core::TransportError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of one established gateway connection.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Best effort; errors are swallowed.
    async fn close(&mut self);
}

/// Read half of one established gateway connection.
#[async_trait]
pub trait TransportReader: Send {
    /// Next inbound text frame. `None` means the stream ended cleanly.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

/// Dials new gateway connections. One connector serves a supervisor for
/// its whole lifetime; every reconnect goes through it.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Establish a fresh connection and split it.
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportWriter>, Box<dyn TransportReader>), TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket implementation
// ─────────────────────────────────────────────────────────────────────────────

const ORIGIN: &str = "https://www.goofish.com";

/// Dials the gateway over `wss://` with the browser-shaped headers the
/// gateway expects.
pub struct WsConnector {
    endpoint: String,
    cookie: Option<String>,
    user_agent: String,
}

impl WsConnector {
    /// Create a connector for `endpoint`, presenting `cookie` (when set)
    /// and `user_agent` during the HTTP upgrade.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, cookie: Option<String>, user_agent: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cookie,
            user_agent: user_agent.into(),
        }
    }

    fn connect_err(&self, message: impl Into<String>) -> TransportError {
        TransportError::Connect {
            endpoint: self.endpoint.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportWriter>, Box<dyn TransportReader>), TransportError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_err(e.to_string()))?;

        let headers = request.headers_mut();
        let _ = headers.insert(
            "Origin",
            HeaderValue::from_static(ORIGIN),
        );
        let _ = headers.insert(
            "User-Agent",
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| self.connect_err(format!("bad user agent: {e}")))?,
        );
        if let Some(cookie) = &self.cookie {
            let _ = headers.insert(
                "Cookie",
                HeaderValue::from_str(cookie)
                    .map_err(|e| self.connect_err(format!("bad cookie: {e}")))?,
            );
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| self.connect_err(e.to_string()))?;
        debug!(status = %response.status(), "websocket upgrade complete");

        let (sink, source) = stream.split();
        Ok((Box::new(WsWriter { sink }), Box::new(WsReader { source })))
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "close frame not delivered");
        }
    }
}

struct WsReader {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        // Pings and pongs are answered by tungstenite itself; skip past
        // them and anything non-text.
        loop {
            return match self.source.next().await? {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => Some(Err(TransportError::Closed {
                    reason: frame.map(|f| f.reason.to_string()),
                })),
                Ok(_) => continue,
                Err(e) => Some(Err(TransportError::Closed {
                    reason: Some(e.to_string()),
                })),
            };
        }
    }
}
