//! GraphQL subscriptions over WebSocket.
//!
//! Implements the client side of the `graphql-transport-ws` protocol. One
//! socket is opened lazily on the first subscription and shared by every
//! subscription made through the same [`WsLink`]. A background driver task
//! owns the socket; it is cancelled when the link is dropped.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::ApiError;
use crate::graphql::{GraphQlError, GraphQlRequest, GraphQlResponse};
use crate::link::{ResponseStream, StreamingLink};

pub const SUBPROTOCOL: &str = "graphql-transport-ws";
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type EventSender = mpsc::UnboundedSender<Result<GraphQlResponse, ApiError>>;

/// Messages of the `graphql-transport-ws` protocol, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Subscribe {
        id: String,
        payload: GraphQlRequest,
    },
    Next {
        id: String,
        payload: GraphQlResponse,
    },
    Error {
        id: String,
        payload: Vec<GraphQlError>,
    },
    Complete {
        id: String,
    },
}

enum Command {
    Subscribe {
        id: String,
        request: GraphQlRequest,
        events: EventSender,
    },
    Complete {
        id: String,
    },
}

struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    _driver: DropGuard,
}

/// Streaming link for subscription operations.
pub struct WsLink {
    url: Url,
    connection_params: Option<serde_json::Value>,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl WsLink {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connection_params: None,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Payload sent with `connection_init`.
    pub fn with_connection_params(mut self, params: serde_json::Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Command channel of the live connection, connecting first if there is
    /// none or the previous socket has gone away.
    async fn commands(&self) -> Result<mpsc::UnboundedSender<Command>, ApiError> {
        let mut connection = self.connection.lock().await;
        if let Some(live) = connection.as_ref().filter(|c| !c.commands.is_closed()) {
            return Ok(live.commands.clone());
        }

        let fresh = self.connect().await?;
        let commands = fresh.commands.clone();
        *connection = Some(fresh);
        Ok(commands)
    }

    async fn connect(&self) -> Result<Connection, ApiError> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
        send(
            &mut socket,
            &ProtocolMessage::ConnectionInit {
                payload: self.connection_params.clone(),
            },
        )
        .await?;
        tokio::time::timeout(ACK_TIMEOUT, wait_for_ack(&mut socket))
            .await
            .map_err(|_| ApiError::Protocol("timed out waiting for connection_ack".into()))??;
        info!(url = %self.url, "streaming connection established");

        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(drive(socket, receiver, cancel.clone()));

        Ok(Connection {
            commands,
            _driver: cancel.drop_guard(),
        })
    }
}

impl StreamingLink for WsLink {
    async fn subscribe(&self, request: GraphQlRequest) -> Result<ResponseStream, ApiError> {
        let commands = self.commands().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (events, receiver) = mpsc::unbounded_channel();

        debug!(%id, operation = ?request.operation_name, "starting subscription");
        commands
            .send(Command::Subscribe {
                id: id.clone(),
                request,
                events,
            })
            .map_err(|_| ApiError::ConnectionClosed)?;

        Ok(Box::pin(Subscription {
            id,
            events: receiver,
            commands,
        }))
    }
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink")
            .field("url", &self.url.as_str())
            .finish()
    }
}

/// Events of one subscription. Dropping it tells the server to stop.
struct Subscription {
    id: String,
    events: mpsc::UnboundedReceiver<Result<GraphQlResponse, ApiError>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Stream for Subscription {
    type Item = Result<GraphQlResponse, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let id = std::mem::take(&mut self.id);
        let _ = self.commands.send(Command::Complete { id });
    }
}

async fn send(socket: &mut Socket, message: &ProtocolMessage) -> Result<(), ApiError> {
    let text = serde_json::to_string(message)?;
    socket.send(Message::text(text)).await?;
    Ok(())
}

async fn wait_for_ack(socket: &mut Socket) -> Result<(), ApiError> {
    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ProtocolMessage>(text.as_str())? {
                ProtocolMessage::ConnectionAck { .. } => return Ok(()),
                ProtocolMessage::Ping { payload } => {
                    send(socket, &ProtocolMessage::Pong { payload }).await?;
                }
                other => {
                    return Err(ApiError::Protocol(format!(
                        "expected connection_ack, got {other:?}"
                    )));
                }
            },
            Message::Close(_) => return Err(ApiError::ConnectionClosed),
            _ => {}
        }
    }
    Err(ApiError::ConnectionClosed)
}

/// Own the socket: forward commands to the server and route server messages
/// to their subscriptions until cancelled or the socket closes.
async fn drive(
    mut socket: Socket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut subscribers: HashMap<String, EventSender> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = socket.close(None).await;
                break;
            }
            command = commands.recv() => match command {
                Some(Command::Subscribe { id, request, events }) => {
                    let message = ProtocolMessage::Subscribe { id: id.clone(), payload: request };
                    if let Err(e) = send(&mut socket, &message).await {
                        warn!(%id, error = %e, "failed to send subscription");
                        let _ = events.send(Err(e));
                        break;
                    }
                    subscribers.insert(id, events);
                }
                Some(Command::Complete { id }) => {
                    if subscribers.remove(&id).is_some() {
                        debug!(%id, "stopping subscription");
                        if let Err(e) = send(&mut socket, &ProtocolMessage::Complete { id }).await {
                            warn!(error = %e, "failed to send complete");
                            break;
                        }
                    }
                }
                None => {
                    let _ = socket.close(None).await;
                    break;
                }
            },
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ProtocolMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Err(e) = dispatch(&mut socket, &mut subscribers, message).await {
                                warn!(error = %e, "streaming connection failed");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring undecodable streaming message"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "streaming connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "streaming connection failed");
                    break;
                }
                None => break,
            },
        }
    }

    // Closed before subscribers hear about it, so the next subscribe reconnects.
    drop(commands);
    for (_, events) in subscribers.drain() {
        let _ = events.send(Err(ApiError::ConnectionClosed));
    }
}

async fn dispatch(
    socket: &mut Socket,
    subscribers: &mut HashMap<String, EventSender>,
    message: ProtocolMessage,
) -> Result<(), ApiError> {
    match message {
        ProtocolMessage::Next { id, payload } => {
            if let Some(events) = subscribers.get(&id) {
                let _ = events.send(Ok(payload));
            }
        }
        ProtocolMessage::Error { id, payload } => {
            if let Some(events) = subscribers.remove(&id) {
                let _ = events.send(Ok(GraphQlResponse {
                    data: None,
                    errors: payload,
                }));
            }
        }
        ProtocolMessage::Complete { id } => {
            subscribers.remove(&id);
        }
        ProtocolMessage::Ping { payload } => {
            send(socket, &ProtocolMessage::Pong { payload }).await?;
        }
        ProtocolMessage::Pong { .. } | ProtocolMessage::ConnectionAck { .. } => {}
        other => debug!(?other, "ignoring unexpected streaming message"),
    }
    Ok(())
}
