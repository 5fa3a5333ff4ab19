//! Claimable upgrade sockets and the per-connection handler loop.

use super::listeners::UpgradeRequest;
use crate::error::{ListenerError, UpgradeError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tracing::debug;

pub use tokio_tungstenite::tungstenite::Error as WsError;
pub use tokio_tungstenite::tungstenite::Message;

/// A WebSocket running over an upgraded HTTP connection.
pub type ServerSocket = WebSocketStream<TokioIo<Upgraded>>;

/// Record of who took a connection and which sub-protocol was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub protocol: Option<HeaderValue>,
}

struct SocketState {
    on_upgrade: Option<OnUpgrade>,
    claim: Option<Claim>,
}

/// The connection carried by one upgrade event.
///
/// Every listener sees the same socket; only the first [`claim`](Self::claim)
/// succeeds.
pub struct UpgradeSocket {
    state: Mutex<SocketState>,
}

impl UpgradeSocket {
    pub fn new(on_upgrade: OnUpgrade) -> Self {
        Self {
            state: Mutex::new(SocketState {
                on_upgrade: Some(on_upgrade),
                claim: None,
            }),
        }
    }

    /// A socket with no underlying connection, for dry runs.
    pub fn detached() -> Self {
        Self {
            state: Mutex::new(SocketState {
                on_upgrade: None,
                claim: None,
            }),
        }
    }

    /// Take the connection. Fails with [`ListenerError::AlreadyUpgraded`]
    /// when another listener got there first.
    pub fn claim(&self, protocol: Option<HeaderValue>) -> Result<PendingSocket, ListenerError> {
        let mut state = self.state.lock();
        if state.claim.is_some() {
            return Err(ListenerError::AlreadyUpgraded);
        }
        state.claim = Some(Claim { protocol });
        Ok(PendingSocket {
            on_upgrade: state.on_upgrade.take(),
        })
    }

    pub fn claimed(&self) -> Option<Claim> {
        self.state.lock().claim.clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.state.lock().claim.is_some()
    }
}

/// A claimed connection waiting for the 101 response to go out.
pub struct PendingSocket {
    on_upgrade: Option<OnUpgrade>,
}

impl PendingSocket {
    pub fn is_detached(&self) -> bool {
        self.on_upgrade.is_none()
    }

    /// Resolve once the handshake response has been written.
    pub async fn into_websocket(self) -> Result<ServerSocket, UpgradeError> {
        let on_upgrade = self.on_upgrade.ok_or(UpgradeError::Detached)?;
        let upgraded = on_upgrade.await?;
        Ok(WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// User logic for one WebSocket connection.
#[async_trait]
pub trait SocketHandler: Send {
    async fn on_open(&mut self, _ctx: &SocketContext) {}

    /// Text and binary frames. Control frames are answered by the protocol
    /// layer and never reach the handler.
    async fn on_message(&mut self, message: Message, ctx: &SocketContext);

    async fn on_close(&mut self, _frame: Option<CloseFrame<'static>>, _ctx: &SocketContext) {}

    async fn on_error(&mut self, error: WsError, ctx: &SocketContext) {
        debug!(path = %ctx.path(), error = %error, "websocket error");
    }
}

/// Builds a fresh handler for every accepted connection.
pub type HandlerFactory = Arc<dyn Fn(&UpgradeRequest) -> Box<dyn SocketHandler> + Send + Sync>;

/// Wrap a closure returning a concrete handler as a [`HandlerFactory`].
pub fn handler_factory<F, H>(f: F) -> HandlerFactory
where
    F: Fn(&UpgradeRequest) -> H + Send + Sync + 'static,
    H: SocketHandler + 'static,
{
    Arc::new(move |req| Box::new(f(req)))
}

/// Outbound side of a connection, handed to every handler callback.
#[derive(Debug, Clone)]
pub struct SocketContext {
    outbound: mpsc::UnboundedSender<Message>,
    path: String,
    protocol: Option<String>,
}

impl SocketContext {
    /// Queue a message. Returns `false` once the connection is gone.
    pub fn send(&self, message: impl Into<Message>) -> bool {
        self.outbound.send(message.into()).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }
}

/// Drive one connection until either side closes it.
pub async fn run_socket<S>(
    stream: WebSocketStream<S>,
    mut handler: Box<dyn SocketHandler>,
    path: String,
    protocol: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut frames) = stream.split();
    let (outbound, mut queued) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = queued.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let ctx = SocketContext {
        outbound,
        path,
        protocol,
    };

    handler.on_open(&ctx).await;

    let mut close_frame = None;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                close_frame = frame;
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(message) => handler.on_message(message, &ctx).await,
            Err(e) => {
                handler.on_error(e, &ctx).await;
                break;
            }
        }
    }

    handler.on_close(close_frame, &ctx).await;
    ctx.close();
    drop(handler);
    let _ = writer.await;
    debug!(path = %ctx.path(), "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let socket = UpgradeSocket::detached();
        assert!(!socket.is_claimed());

        let pending = socket.claim(Some(HeaderValue::from_static("chat"))).unwrap();
        assert!(pending.is_detached());
        assert!(socket.is_claimed());
        assert_eq!(
            socket.claimed().unwrap().protocol,
            Some(HeaderValue::from_static("chat"))
        );
    }

    #[test]
    fn second_claim_is_double_upgrade() {
        let socket = UpgradeSocket::detached();
        socket.claim(None).unwrap();
        assert_eq!(socket.claim(None).err(), Some(ListenerError::AlreadyUpgraded));
    }

    #[tokio::test]
    async fn detached_socket_cannot_become_websocket() {
        let socket = UpgradeSocket::detached();
        let pending = socket.claim(None).unwrap();
        assert!(matches!(
            pending.into_websocket().await,
            Err(UpgradeError::Detached)
        ));
    }

    struct Echo;

    #[async_trait]
    impl SocketHandler for Echo {
        async fn on_message(&mut self, message: Message, ctx: &SocketContext) {
            ctx.send(message);
        }
    }

    #[tokio::test]
    async fn run_socket_echoes_over_duplex() {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let task = tokio::spawn(run_socket(server, Box::new(Echo), "/ws".into(), None));

        client.send(Message::Text("ping".into())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("ping".into()));

        client.close(None).await.unwrap();
        task.await.unwrap();
    }
}
