//! Path-keyed WebSocket handler table and the in-request upgrade layer.

use super::handshake::{accept, bad_request, head_of, is_upgrade_request, switching_protocols};
use super::listeners::UpgradeRequest;
use super::socket::{HandlerFactory, UpgradeSocket};
use crate::error::ListenerError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handler table. Clones see the same registrations.
#[derive(Clone, Default)]
pub struct UpgradeRoutes {
    routes: Arc<DashMap<String, HandlerFactory>>,
}

impl UpgradeRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `path`. Registrations for other paths are
    /// untouched; a second registration for the same path replaces the first.
    /// Returns `true` when a handler was replaced.
    pub fn insert(&self, path: impl Into<String>, factory: HandlerFactory) -> bool {
        let path = path.into();
        let replaced = self.routes.insert(path.clone(), factory).is_some();
        if replaced {
            debug!(path = %path, "websocket handler replaced");
        }
        replaced
    }

    pub fn get(&self, path: &str) -> Option<HandlerFactory> {
        self.routes.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Accept `request` on `socket` when a handler is registered for its
    /// path. Returns `Ok(false)` when the request is not for this table.
    pub fn dispatch(
        &self,
        request: &UpgradeRequest,
        socket: &UpgradeSocket,
    ) -> Result<bool, ListenerError> {
        if !is_upgrade_request(request.headers()) {
            return Ok(false);
        }
        let Some(factory) = self.get(request.uri().path()) else {
            return Ok(false);
        };
        accept(socket, request, &factory)?;
        Ok(true)
    }
}

impl fmt::Debug for UpgradeRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeRoutes")
            .field("paths", &self.paths())
            .finish()
    }
}

/// Middleware answering upgrade requests for registered paths from inside
/// the request pipeline. Everything else continues down the stack.
pub async fn upgrade_layer(
    State(routes): State<UpgradeRoutes>,
    mut request: Request,
    next: Next,
) -> Response {
    if !is_upgrade_request(request.headers()) || routes.get(request.uri().path()).is_none() {
        return next.run(request).await;
    }

    let head = head_of(&request);
    let socket = UpgradeSocket::new(hyper::upgrade::on(&mut request));
    if let Err(e) = routes.dispatch(&head, &socket) {
        warn!(path = %head.uri().path(), error = %e, "in-request upgrade rejected");
        return bad_request(&e.to_string());
    }

    let protocol = socket.claimed().and_then(|claim| claim.protocol);
    switching_protocols(head.headers(), protocol.as_ref())
        .unwrap_or_else(|e| bad_request(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::socket::{Message, SocketContext, SocketHandler, handler_factory};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use tower::ServiceExt;

    struct Silent;

    #[async_trait]
    impl SocketHandler for Silent {
        async fn on_message(&mut self, _message: Message, _ctx: &SocketContext) {}
    }

    fn upgrade(path: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(path)
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn distinct_paths_coexist() {
        let routes = UpgradeRoutes::new();
        assert!(!routes.insert("/a", handler_factory(|_| Silent)));
        assert!(!routes.insert("/b", handler_factory(|_| Silent)));
        assert_eq!(routes.paths(), vec!["/a", "/b"]);
    }

    #[test]
    fn same_path_last_wins() {
        let routes = UpgradeRoutes::new();
        routes.insert("/a", handler_factory(|_| Silent));
        assert!(routes.insert("/a", handler_factory(|_| Silent)));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn dispatch_ignores_unknown_paths() {
        let routes = UpgradeRoutes::new();
        routes.insert("/ws", handler_factory(|_| Silent));
        let socket = UpgradeSocket::detached();

        let head = head_of(&upgrade("/other"));
        assert!(!routes.dispatch(&head, &socket).unwrap());
        assert!(!socket.is_claimed());

        let head = head_of(&upgrade("/ws"));
        assert!(routes.dispatch(&head, &socket).unwrap());
        assert!(socket.is_claimed());
    }

    #[tokio::test]
    async fn layer_answers_registered_paths_only() {
        let routes = UpgradeRoutes::new();
        routes.insert("/ws", handler_factory(|_| Silent));
        let app = Router::new()
            .route("/", get(|| async { "page" }))
            .layer(axum::middleware::from_fn_with_state(routes, upgrade_layer));

        let response = app.clone().oneshot(upgrade("/ws")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

        let response = app
            .oneshot(http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
