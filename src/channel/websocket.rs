//! Production WebSocket transport
//!
//! Opens a WebSocket to the room's channel endpoint and translates socket
//! messages into [`TransportEvent`]s. The auth token is carried in the
//! `Sec-WebSocket-Protocol` header alongside the channel subprotocol, never
//! in the URL path.

use super::{Connector, Transport, TransportError, TransportEvent};
use crate::config::ChannelOptions;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// Subprotocol name announced next to the auth token.
pub const SUBPROTOCOL: &str = "roomlink.v1";

/// Connector for the production WebSocket transport.
#[derive(Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Build the channel endpoint URL for a room.
pub(crate) fn build_endpoint(options: &ChannelOptions) -> Result<Url, TransportError> {
    let mut url = Url::parse(&options.server_url)
        .map_err(|_| TransportError::InvalidEndpoint(options.server_url.clone()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{other}' (expected ws or wss)"
            )));
        }
    }
    let path = format!(
        "{}/rooms/{}/channel",
        url.path().trim_end_matches('/'),
        options.room_id
    );
    url.set_path(&path);
    Ok(url)
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        options: &ChannelOptions,
        events: tokio::sync::mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let url = build_endpoint(options)?;
        let token = options
            .auth_token
            .as_deref()
            .ok_or_else(|| TransportError::Handshake("no auth credential".to_string()))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let protocols = format!("{SUBPROTOCOL}, {token}");
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(&protocols)
                .map_err(|_| TransportError::Handshake("token is not header-safe".to_string()))?,
        );

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let (write, read) = stream.split();

        let open = Arc::new(AtomicBool::new(true));
        let reader = spawn_reader(read, events, open.clone());

        Ok(Box::new(WebSocketTransport {
            write,
            open,
            reader,
        }))
    }
}

type WsRead =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Reader half: pumps socket messages into the event channel. Guarantees
/// that exactly one `Closed` event terminates the stream, and that any
/// `Error` event precedes it.
fn spawn_reader(
    mut read: WsRead,
    events: tokio::sync::mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut closed = None;
        while let Some(item) = read.next().await {
            match item {
                Ok(Message::Text(text)) => {
                    if events.send(TransportEvent::Frame(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(frame.code.into()), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    closed = Some(TransportEvent::Closed { code, reason });
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // transport-level keepalive, answered by tungstenite;
                    // distinct from the application heartbeat
                }
                Ok(Message::Binary(payload)) => {
                    debug!(bytes = payload.len(), "ignoring binary frame");
                }
                Ok(_) => {}
                Err(e) => {
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Error(e.to_string())).await;
                    closed = Some(TransportEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        open.store(false, Ordering::SeqCst);
        let closed = closed.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: "stream ended".to_string(),
        });
        let _ = events.send(closed).await;
    })
}

struct WebSocketTransport {
    write: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.write.send(Message::Text(frame)).await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            warn!(error = %e, "websocket send failed");
            TransportError::Send(e.to_string())
        })
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client close".into(),
        };
        let _ = self.write.send(Message::Close(Some(frame))).await;
        let _ = self.write.flush().await;
        self.reader.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(server_url: &str) -> ChannelOptions {
        ChannelOptions::new("room-12", server_url).with_auth_token("tok")
    }

    #[test]
    fn test_endpoint_is_room_scoped() {
        let url = build_endpoint(&options("wss://play.example.net")).unwrap();
        assert_eq!(url.as_str(), "wss://play.example.net/rooms/room-12/channel");
    }

    #[test]
    fn test_endpoint_preserves_base_path() {
        let url = build_endpoint(&options("wss://play.example.net/api/")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://play.example.net/api/rooms/room-12/channel"
        );
    }

    #[test]
    fn test_endpoint_rejects_http_scheme() {
        let result = build_endpoint(&options("https://play.example.net"));
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        let result = build_endpoint(&options("not a url"));
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_token_never_in_url() {
        let url = build_endpoint(&options("wss://play.example.net")).unwrap();
        assert!(!url.as_str().contains("tok"));
    }
}
