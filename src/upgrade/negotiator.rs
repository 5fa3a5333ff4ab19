//! Per-runtime upgrade negotiation.
//!
//! [`negotiate`] picks an [`UpgradeNegotiator`] for the active runtime and
//! wraps it in an [`UpgradeCapability`], the handle user code registers
//! WebSocket handlers through. Every variant exposes the same two
//! operations; only how the handlers reach the wire differs:
//!
//! - process: one injected listener on the server's upgrade event source
//! - fast: the handler table becomes a field of the launch descriptor
//! - edge: an in-request upgrade layer inside the app itself
//!
//! Disabled or unrecognized runtimes get [`NoopNegotiator`].

use super::listeners::{ListenerId, UpgradeRequest, listener};
use super::routes::UpgradeRoutes;
use super::server::{ProcessServer, ServerHandle};
use super::socket::{HandlerFactory, SocketHandler, handler_factory};
use crate::mode::Mode;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the listener the process variant attaches to a server.
pub const UPGRADE_INJECTOR_NAME: &str = "upgradeInjector";

/// Runtime-specific half of an [`UpgradeCapability`].
pub trait UpgradeNegotiator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Register `factory` for upgrades on `path`.
    fn register_handler(&self, path: &str, factory: HandlerFactory);

    /// Wire registered handlers into `server` and return the handle to use
    /// from now on.
    fn bind_server(&self, server: ServerHandle) -> ServerHandle;

    /// Handlers the app has to serve itself.
    fn in_app_routes(&self) -> Option<UpgradeRoutes> {
        None
    }
}

// ============================================================================
// Variants
// ============================================================================

/// Inert variant: nothing is ever registered or attached.
#[derive(Debug, Default)]
pub struct NoopNegotiator;

impl UpgradeNegotiator for NoopNegotiator {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn register_handler(&self, path: &str, _factory: HandlerFactory) {
        debug!(path, "websocket support disabled, handler ignored");
    }

    fn bind_server(&self, server: ServerHandle) -> ServerHandle {
        server
    }
}

/// Injects one upgrade listener per bound process server.
#[derive(Default)]
pub struct ProcessNegotiator {
    routes: UpgradeRoutes,
    bound: Mutex<Vec<(ProcessServer, ListenerId)>>,
}

impl ProcessNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, server: &ProcessServer) {
        let mut bound = self.bound.lock();
        bound.retain(|(s, id)| s.upgrade_events().contains(*id));
        if bound.iter().any(|(s, _)| s.same_server(server)) {
            debug!("upgrade listener already attached");
            return;
        }

        let routes = self.routes.clone();
        let id = server.upgrade_events().add(
            listener(move |request, socket| {
                if let Err(e) = routes.dispatch(request, socket) {
                    warn!(
                        path = %request.uri().path(),
                        code = e.error_code(),
                        error = %e,
                        "upgrade listener could not accept connection"
                    );
                }
            }),
            UPGRADE_INJECTOR_NAME,
        );
        bound.push((server.clone(), id));
    }
}

impl UpgradeNegotiator for ProcessNegotiator {
    fn name(&self) -> &'static str {
        "process"
    }

    fn register_handler(&self, path: &str, factory: HandlerFactory) {
        self.routes.insert(path, factory);
    }

    fn bind_server(&self, server: ServerHandle) -> ServerHandle {
        match &server {
            ServerHandle::Process(process) => self.attach(process),
            other => warn!(kind = other.kind(), "process negotiator cannot bind this server"),
        }
        server
    }
}

/// Hands the handler table to the fast runtime through its launch descriptor.
#[derive(Debug, Default)]
pub struct FastNegotiator {
    routes: UpgradeRoutes,
}

impl FastNegotiator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpgradeNegotiator for FastNegotiator {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn register_handler(&self, path: &str, factory: HandlerFactory) {
        self.routes.insert(path, factory);
    }

    fn bind_server(&self, server: ServerHandle) -> ServerHandle {
        match server {
            ServerHandle::Descriptor(mut descriptor) => {
                descriptor.websocket = Some(self.routes.clone());
                ServerHandle::Descriptor(descriptor)
            }
            other => {
                warn!(kind = other.kind(), "fast negotiator cannot bind this server");
                other
            }
        }
    }
}

/// Serves upgrades from inside the app; nothing to bind.
#[derive(Debug, Default)]
pub struct EdgeNegotiator {
    routes: UpgradeRoutes,
}

impl EdgeNegotiator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpgradeNegotiator for EdgeNegotiator {
    fn name(&self) -> &'static str {
        "edge"
    }

    fn register_handler(&self, path: &str, factory: HandlerFactory) {
        self.routes.insert(path, factory);
    }

    fn bind_server(&self, server: ServerHandle) -> ServerHandle {
        server
    }

    fn in_app_routes(&self) -> Option<UpgradeRoutes> {
        Some(self.routes.clone())
    }
}

// ============================================================================
// Capability
// ============================================================================

/// The uniform upgrade interface handed to user code.
#[derive(Clone)]
pub struct UpgradeCapability {
    negotiator: Arc<dyn UpgradeNegotiator>,
}

impl UpgradeCapability {
    pub fn new<N: UpgradeNegotiator + 'static>(negotiator: N) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
        }
    }

    pub fn noop() -> Self {
        Self::new(NoopNegotiator)
    }

    pub fn name(&self) -> &'static str {
        self.negotiator.name()
    }

    pub fn is_noop(&self) -> bool {
        self.name() == NoopNegotiator.name()
    }

    pub fn register_handler(&self, path: &str, factory: HandlerFactory) {
        self.negotiator.register_handler(path, factory);
    }

    /// Register a handler built by `f` for every connection on `path`.
    pub fn upgrade_websocket<F, H>(&self, path: &str, f: F)
    where
        F: Fn(&UpgradeRequest) -> H + Send + Sync + 'static,
        H: SocketHandler + 'static,
    {
        self.register_handler(path, handler_factory(f));
    }

    pub fn bind_server(&self, server: impl Into<ServerHandle>) -> ServerHandle {
        self.negotiator.bind_server(server.into())
    }

    pub fn in_app_routes(&self) -> Option<UpgradeRoutes> {
        self.negotiator.in_app_routes()
    }
}

impl fmt::Debug for UpgradeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeCapability")
            .field("negotiator", &self.name())
            .finish()
    }
}

/// Pick the negotiator for `runtime`.
///
/// Development always uses the process variant: locally every runtime is
/// fronted by the process-based dev server.
pub fn negotiate(enabled: bool, runtime: &Runtime, mode: Mode) -> UpgradeCapability {
    if !enabled {
        return UpgradeCapability::noop();
    }
    if mode.is_development() {
        return UpgradeCapability::new(ProcessNegotiator::new());
    }
    match runtime {
        Runtime::Process => UpgradeCapability::new(ProcessNegotiator::new()),
        Runtime::Fast => UpgradeCapability::new(FastNegotiator::new()),
        Runtime::Edge => UpgradeCapability::new(EdgeNegotiator::new()),
        Runtime::Other(id) => {
            debug!(runtime = %id, "websocket upgrades not supported on this runtime");
            UpgradeCapability::noop()
        }
    }
}
