//! Transport for the push connection
//!
//! A [`Transport`] opens one bidirectional [`Link`]. The Connection Manager
//! only sees envelopes on channels, so tests can swap the WebSocket for an
//! in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::message::Envelope;

/// Errors raised while opening a link
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The server could not be reached
    #[error("connect failed: {0}")]
    Connect(String),

    /// The server was reached but refused the handshake (bad URL or credentials)
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// No answer within the handshake timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// One open connection: frames to send and frames received
///
/// The link is dropped when `inbound` yields `None`. Dropping `outbound`
/// closes the underlying connection.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

/// Opens links to the push server
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Link, ConnectionError>;
}

/// WebSocket transport
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    auth_token: Option<String>,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: &str, auth_token: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            auth_token,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Link, ConnectionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!("Connecting to {}", self.url);
        let (ws_stream, _response) =
            match tokio::time::timeout(self.handshake_timeout, connect_async(request)).await {
                Err(_) => return Err(ConnectionError::Timeout(self.handshake_timeout)),
                Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
                    return Err(ConnectionError::Handshake(format!(
                        "server answered {}",
                        response.status()
                    )));
                }
                Ok(Err(e)) => return Err(ConnectionError::Connect(e.to_string())),
                Ok(Ok(pair)) => pair,
            };

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Envelope>();

        // Writer: runs until the manager drops its sender
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let frame = match envelope.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping unencodable {} frame: {}", envelope.event, e);
                        continue;
                    }
                };
                if write.send(WsMessage::Text(frame)).await.is_err() {
                    break;
                }
            }
            write.close().await.ok();
        });

        // Reader: runs until the socket closes or the manager stops listening
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match Envelope::decode(&text) {
                        Ok(envelope) => {
                            if inbound_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_handshake_error() {
        let transport = WebSocketTransport::new("not a url", None);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/ws", None)
            .with_handshake_timeout(Duration::from_secs(5));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Connect(_) | ConnectionError::Timeout(_)
        ));
    }
}
