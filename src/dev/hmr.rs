//! The hot-reload channel.
//!
//! Browsers connect with the `vite-hmr` sub-protocol and receive JSON
//! notices (`connected`, `full-reload`). Its upgrade listener is the one the
//! arbiter never touches.

use super::arbiter::{HMR_LISTENER_NAME, HMR_PROTOCOL};
use crate::upgrade::handshake::{accept, offered_protocols};
use crate::upgrade::{
    HandlerFactory, ListenerId, ListenerRegistry, Message, SocketContext, SocketHandler,
    UpgradeListener, handler_factory, listener,
};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const NOTICE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct HotReloadChannel {
    notices: broadcast::Sender<String>,
    path: String,
}

impl HotReloadChannel {
    pub fn new(path: impl Into<String>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            notices,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach the channel's listener to `events` under [`HMR_LISTENER_NAME`].
    pub fn install(&self, events: &ListenerRegistry) -> ListenerId {
        events.add(self.listener(), HMR_LISTENER_NAME)
    }

    /// Claims upgrades on the channel path that ask for exactly `vite-hmr`.
    pub fn listener(&self) -> UpgradeListener {
        let path = self.path.clone();
        let factory = self.factory();
        listener(move |request, socket| {
            if offered_protocols(request.headers()) != Some(HMR_PROTOCOL)
                || request.uri().path() != path
            {
                return;
            }
            if let Err(e) = accept(socket, request, &factory) {
                warn!(code = e.error_code(), error = %e, "hot-reload upgrade rejected");
            }
        })
    }

    fn factory(&self) -> HandlerFactory {
        let notices = self.notices.clone();
        handler_factory(move |_| HotReloadSocket {
            notices: Some(notices.subscribe()),
            forwarder: None,
        })
    }

    /// Broadcast a notice to every connected client. Returns the number of
    /// clients reached.
    pub fn send(&self, notice: &serde_json::Value) -> usize {
        self.notices.send(notice.to_string()).unwrap_or(0)
    }

    /// Ask every connected browser to reload the page.
    pub fn full_reload(&self) -> usize {
        let reached = self.send(&json!({ "type": "full-reload", "path": "*" }));
        debug!(reached, "full reload sent");
        reached
    }

    pub fn clients(&self) -> usize {
        self.notices.receiver_count()
    }
}

struct HotReloadSocket {
    notices: Option<broadcast::Receiver<String>>,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl SocketHandler for HotReloadSocket {
    async fn on_open(&mut self, ctx: &SocketContext) {
        ctx.send(json!({ "type": "connected" }).to_string());

        let Some(mut notices) = self.notices.take() else {
            return;
        };
        let ctx = ctx.clone();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        if !ctx.send(notice) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "hot-reload client lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    async fn on_message(&mut self, message: Message, _ctx: &SocketContext) {
        debug!(?message, "hot-reload client message");
    }

    async fn on_close(
        &mut self,
        _frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame<'static>>,
        _ctx: &SocketContext,
    ) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
