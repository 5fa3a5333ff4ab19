//! The development server.
//!
//! One process server fronts the app in development whatever the deployment
//! runtime. It owns the hot-reload channel, skips paths belonging to the
//! asset pipeline, and swaps in a freshly assembled app on every reload.

use super::arbiter::UpgradeArbiter;
use super::hmr::HotReloadChannel;
use crate::app::socket_info::{REMOTE_ADDRESS_HEADER, REMOTE_FAMILY_HEADER, REMOTE_PORT_HEADER};
use crate::config::DevConfig;
use crate::error::{DevError, ListenerError};
use crate::upgrade::{ProcessServer, UpgradeCapability};
use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::response::{IntoResponse, Response};
use glob::{MatchOptions, Pattern};
use http::{HeaderValue, StatusCode, Uri};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tracing::{debug, info};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Paths the dev server leaves to the asset pipeline.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    globs: Vec<Pattern>,
    regexes: Vec<Regex>,
}

impl ExcludeSet {
    /// Defaults (the app directory, `/@*`, `/node_modules/*`, `?import`) plus
    /// the configured extras.
    pub fn new(config: &DevConfig) -> Result<Self, DevError> {
        let app = config.app_directory.trim_matches('/');
        let mut globs = vec![format!("/{app}/**/*"), format!("/{app}/**/.*/**")];
        globs.extend(config.exclude.iter().cloned());

        let mut regexes = vec![
            r"^/@.+$".to_string(),
            r"^/node_modules/.*".to_string(),
            r"\?import$".to_string(),
        ];
        regexes.extend(config.exclude_regex.iter().cloned());

        Ok(Self {
            globs: globs
                .into_iter()
                .map(|pattern| {
                    Pattern::new(&pattern).map_err(|source| DevError::Glob { pattern, source })
                })
                .collect::<Result<_, _>>()?,
            regexes: regexes
                .iter()
                .map(|r| Regex::new(r))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn matches(&self, uri: &Uri) -> bool {
        let path = uri.path();
        let target = uri.path_and_query().map_or(path, |pq| pq.as_str());
        self.globs.iter().any(|g| g.matches_with(path, GLOB_OPTIONS))
            || self.regexes.iter().any(|r| r.is_match(target))
    }
}

struct DevInner {
    server: ProcessServer,
    hot_reload: HotReloadChannel,
    exclude: ExcludeSet,
    app: RwLock<Router>,
    arbiter: Mutex<UpgradeArbiter>,
}

/// Shared handle to the development server.
#[derive(Clone)]
pub struct DevServer {
    inner: Arc<DevInner>,
}

impl DevServer {
    pub fn new(config: &DevConfig) -> Result<Self, DevError> {
        let server = ProcessServer::new();
        let hot_reload = HotReloadChannel::new(config.hmr_path.clone());
        hot_reload.install(server.upgrade_events());

        Ok(Self {
            inner: Arc::new(DevInner {
                arbiter: Mutex::new(UpgradeArbiter::new(server.clone())),
                server,
                hot_reload,
                exclude: ExcludeSet::new(config)?,
                app: RwLock::new(Router::new()),
            }),
        })
    }

    pub fn server(&self) -> &ProcessServer {
        &self.inner.server
    }

    pub fn hot_reload(&self) -> &HotReloadChannel {
        &self.inner.hot_reload
    }

    /// Serve `router`, installing `upgrade` through one arbiter cycle.
    pub fn mount(&self, router: Router, upgrade: &UpgradeCapability) -> Result<(), ListenerError> {
        self.inner.arbiter.lock().run_cycle(upgrade)?;
        *self.inner.app.write() = router;
        info!("Running in development mode");
        Ok(())
    }

    /// Mount a rebuilt app and tell connected browsers to reload.
    pub fn reload(&self, router: Router, upgrade: &UpgradeCapability) -> Result<usize, ListenerError> {
        self.mount(router, upgrade)?;
        Ok(self.inner.hot_reload.full_reload())
    }

    /// The router the dev server answers plain requests with.
    pub fn front(&self) -> Router {
        let dev = self.clone();
        Router::new().fallback(move |request: Request| {
            let dev = dev.clone();
            async move { dev.forward(request).await }
        })
    }

    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.inner.server.serve(listener, self.front(), shutdown).await
    }

    async fn forward(&self, mut request: Request) -> Response {
        if self.inner.exclude.matches(request.uri()) {
            debug!(uri = %request.uri(), "excluded from dev server");
            return StatusCode::NOT_FOUND.into_response();
        }

        if let Some(ConnectInfo(remote)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied() {
            bind_remote_headers(request.headers_mut(), remote);
        }

        let app = self.inner.app.read().clone();
        match app.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("server", &self.inner.server)
            .field("hmr_path", &self.inner.hot_reload.path())
            .finish_non_exhaustive()
    }
}

/// Expose the peer address to the app the way the asset pipeline's proxy does.
fn bind_remote_headers(headers: &mut http::HeaderMap, remote: SocketAddr) {
    let family = if remote.is_ipv4() { "IPv4" } else { "IPv6" };
    if let Ok(address) = HeaderValue::from_str(&remote.ip().to_string()) {
        headers.insert(REMOTE_ADDRESS_HEADER, address);
    }
    headers.insert(REMOTE_PORT_HEADER, HeaderValue::from(remote.port()));
    headers.insert(REMOTE_FAMILY_HEADER, HeaderValue::from_static(family));
}
