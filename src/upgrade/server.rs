//! Server handles the negotiator can bind to.
//!
//! A [`ProcessServer`] is a shared handle whose upgrade event source is
//! mutated in place. A [`ServeDescriptor`] is a plain value describing a
//! server that has not been launched yet; binding replaces it.

use super::handshake::{bad_request, head_of, is_upgrade_request, switching_protocols};
use super::listeners::ListenerRegistry;
use super::routes::{UpgradeRoutes, upgrade_layer};
use super::socket::UpgradeSocket;
use crate::shutdown::LiveServer;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::ServiceExt;
use tracing::{debug, info, warn};

struct ProcessInner {
    upgrade_events: ListenerRegistry,
}

/// Process-based HTTP server with an upgrade event source.
///
/// Upgrade requests go to the registered listeners when there are any;
/// everything else is routed through the app.
#[derive(Clone)]
pub struct ProcessServer {
    inner: Arc<ProcessInner>,
}

impl Default for ProcessServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProcessInner {
                upgrade_events: ListenerRegistry::new(),
            }),
        }
    }

    pub fn upgrade_events(&self) -> &ListenerRegistry {
        &self.inner.upgrade_events
    }

    /// Whether two handles point at the same server.
    pub fn same_server(&self, other: &ProcessServer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Accept connections until `shutdown` resolves, then wait for open
    /// requests to finish. Upgraded sockets are not waited for.
    pub async fn serve<F>(&self, listener: TcpListener, app: Router, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "process server listening");
        tokio::pin!(shutdown);

        let (drain, draining) = watch::channel(());
        let mut connections = JoinSet::new();

        loop {
            while connections.try_join_next().is_some() {}

            let (stream, remote) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let server = self.clone();
            let app = app.clone();
            let mut draining = draining.clone();
            connections.spawn(async move {
                let service = service_fn(move |mut req: Request<Incoming>| {
                    let server = server.clone();
                    let app = app.clone();
                    req.extensions_mut().insert(ConnectInfo(remote));
                    async move { Ok::<_, Infallible>(server.handle(req, app).await) }
                });

                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades();
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = draining.changed() => {
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                };
                if let Err(e) = result {
                    debug!(%remote, error = %e, "connection closed with error");
                }
            });
        }

        drop(listener);
        let open = connections.len();
        if open > 0 {
            info!(%addr, open, "draining connections");
        }
        let _ = drain.send(());
        while connections.join_next().await.is_some() {}

        info!(%addr, "process server stopped");
        Ok(())
    }

    async fn handle(&self, req: Request<Incoming>, app: Router) -> Response<Body> {
        if is_upgrade_request(req.headers()) && !self.inner.upgrade_events.is_empty() {
            return self.emit_upgrade(req);
        }
        match app.oneshot(req.map(Body::new)).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Raise an upgrade event for `req` and answer it.
    ///
    /// A listener that claimed the socket gets a `101` response; an event
    /// nobody claimed is refused with `400`.
    pub fn emit_upgrade<B>(&self, mut req: Request<B>) -> Response<Body> {
        let head = head_of(&req);
        let socket = UpgradeSocket::new(hyper::upgrade::on(&mut req));
        let invoked = self.inner.upgrade_events.emit(&head, &socket);

        match socket.claimed() {
            Some(claim) => switching_protocols(head.headers(), claim.protocol.as_ref())
                .unwrap_or_else(|e| bad_request(&e.to_string())),
            None => {
                debug!(path = %head.uri().path(), invoked, "upgrade not handled");
                bad_request("upgrade not handled")
            }
        }
    }
}

impl fmt::Debug for ProcessServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessServer")
            .field("upgrade_events", &self.inner.upgrade_events)
            .finish()
    }
}

/// Launch description for the fast runtime.
#[derive(Clone)]
pub struct ServeDescriptor {
    pub port: u16,
    pub hostname: String,
    pub development: bool,
    pub app: Router,
    /// Upgrade handlers served alongside the app.
    pub websocket: Option<UpgradeRoutes>,
}

impl ServeDescriptor {
    pub fn new(app: Router, port: u16) -> Self {
        Self {
            port,
            hostname: "0.0.0.0".to_string(),
            development: false,
            app,
            websocket: None,
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    /// The router that will actually be served.
    pub fn into_router(self) -> Router {
        match self.websocket {
            Some(routes) => self
                .app
                .layer(axum::middleware::from_fn_with_state(routes, upgrade_layer)),
            None => self.app,
        }
    }

    pub async fn launch(self) -> io::Result<LiveServer> {
        let addr = (self.hostname.clone(), self.port);
        LiveServer::launch_router(addr, self.into_router()).await
    }
}

impl fmt::Debug for ServeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeDescriptor")
            .field("port", &self.port)
            .field("hostname", &self.hostname)
            .field("development", &self.development)
            .field("websocket", &self.websocket)
            .finish_non_exhaustive()
    }
}

/// Anything [`bind_server`](super::UpgradeCapability::bind_server) accepts.
#[derive(Debug, Clone)]
pub enum ServerHandle {
    Process(ProcessServer),
    Descriptor(ServeDescriptor),
}

impl ServerHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerHandle::Process(_) => "process",
            ServerHandle::Descriptor(_) => "descriptor",
        }
    }

    pub fn as_process(&self) -> Option<&ProcessServer> {
        match self {
            ServerHandle::Process(server) => Some(server),
            ServerHandle::Descriptor(_) => None,
        }
    }

    pub fn into_descriptor(self) -> Option<ServeDescriptor> {
        match self {
            ServerHandle::Descriptor(descriptor) => Some(descriptor),
            ServerHandle::Process(_) => None,
        }
    }
}

impl From<ProcessServer> for ServerHandle {
    fn from(server: ProcessServer) -> Self {
        ServerHandle::Process(server)
    }
}

impl From<ServeDescriptor> for ServerHandle {
    fn from(descriptor: ServeDescriptor) -> Self {
        ServerHandle::Descriptor(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::listeners::listener;
    use http::StatusCode;

    fn upgrade_request(protocol: Option<&str>) -> Request<()> {
        let mut builder = Request::builder()
            .uri("/ws")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(protocol) = protocol {
            builder = builder.header("sec-websocket-protocol", protocol);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn clones_share_the_event_source() {
        let server = ProcessServer::new();
        let clone = server.clone();
        clone.upgrade_events().add(listener(|_, _| {}), "x");
        assert!(server.same_server(&clone));
        assert_eq!(server.upgrade_events().len(), 1);
        assert!(!server.same_server(&ProcessServer::new()));
    }

    #[test]
    fn unclaimed_upgrade_is_refused() {
        let server = ProcessServer::new();
        server.upgrade_events().add(listener(|_, _| {}), "ignores");
        let response = server.emit_upgrade(upgrade_request(None));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn claimed_upgrade_switches_protocols() {
        let server = ProcessServer::new();
        server.upgrade_events().add(
            listener(|req, socket| {
                let protocol = req.headers().get("sec-websocket-protocol").cloned();
                let _ = socket.claim(protocol);
            }),
            "claims",
        );
        let response = server.emit_upgrade(upgrade_request(Some("chat")));
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()["sec-websocket-protocol"], "chat");
    }

    #[test]
    fn descriptor_without_websocket_is_plain_app() {
        let descriptor = ServeDescriptor::new(Router::new(), 3000).development(true);
        assert!(descriptor.websocket.is_none());
        assert!(descriptor.development);
        let handle = ServerHandle::from(descriptor);
        assert_eq!(handle.kind(), "descriptor");
        assert!(handle.as_process().is_none());
    }
}
