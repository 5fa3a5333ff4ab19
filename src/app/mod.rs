//! Application assembly.
//!
//! [`assemble`] builds the router every runtime adapter serves. Layers, from
//! the outside in:
//!
//! 1. socket info (development only)
//! 2. the user's `before_all`
//! 3. client assets under `/{assets_dir}`
//! 4. public files
//! 5. the request logger
//! 6. the user's `configure`
//! 7. the render fallback, mounted at the basename and `{basename}.data`

pub mod logger;
pub mod socket_info;
pub mod static_files;

pub use logger::log_requests;
pub use socket_info::{ConnInfo, bind_socket_info};
pub use static_files::{StaticFiles, serve_static};

use crate::build::BuildSource;
use crate::config::Config;
use crate::dev::DevServer;
use crate::error::{BoxError, RenderError};
use crate::mode::Mode;
use crate::render::{ContextFuture, GetLoadContext, LoadContextArgs, RequestHandler, render};
use crate::runtime::Runtime;
use crate::shutdown::ShutdownCallback;
use crate::upgrade::{UpgradeCapability, negotiate, upgrade_layer};
use axum::Router;
use axum::extract::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use http::StatusCode;
use http::request::Parts;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// User hook adding routes and middleware. The capability is present only
/// when WebSocket support was requested.
pub type Configure = Arc<dyn Fn(Router, Option<&UpgradeCapability>) -> Router + Send + Sync>;

/// User hook wrapping the app before any built-in middleware runs.
pub type BeforeAll = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// User hook turning a render failure into a response.
pub type OnError = Arc<dyn Fn(RenderError) -> Response + Send + Sync>;

/// Everything a user can customize about the assembled server.
#[derive(Clone)]
pub struct ServerOptions {
    pub port: Option<u16>,
    pub use_websocket: bool,
    pub default_logger: bool,
    pub serve_static: bool,
    pub configure: Option<Configure>,
    pub before_all: Option<BeforeAll>,
    pub get_load_context: Option<GetLoadContext>,
    pub on_error: Option<OnError>,
    /// Cleanup run once on SIGTERM/SIGINT (fast runtime, production).
    pub on_graceful_shutdown: Option<ShutdownCallback>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: None,
            use_websocket: false,
            default_logger: true,
            serve_static: true,
            configure: None,
            before_all: None,
            get_load_context: None,
            on_error: None,
            on_graceful_shutdown: None,
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn use_websocket(mut self, enabled: bool) -> Self {
        self.use_websocket = enabled;
        self
    }

    pub fn default_logger(mut self, enabled: bool) -> Self {
        self.default_logger = enabled;
        self
    }

    pub fn serve_static(mut self, enabled: bool) -> Self {
        self.serve_static = enabled;
        self
    }

    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: Fn(Router, Option<&UpgradeCapability>) -> Router + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(f));
        self
    }

    pub fn before_all<F>(mut self, f: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.before_all = Some(Arc::new(f));
        self
    }

    pub fn get_load_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &LoadContextArgs) -> ContextFuture + Send + Sync + 'static,
    {
        self.get_load_context = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(RenderError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_graceful_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_graceful_shutdown = Some(Arc::new(move || f().boxed()));
        self
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("port", &self.port)
            .field("use_websocket", &self.use_websocket)
            .field("default_logger", &self.default_logger)
            .field("serve_static", &self.serve_static)
            .field("configure", &self.configure.is_some())
            .field("before_all", &self.before_all.is_some())
            .field("get_load_context", &self.get_load_context.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_graceful_shutdown", &self.on_graceful_shutdown.is_some())
            .finish()
    }
}

/// Where static files live and how long clients may cache them.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub client_directory: PathBuf,
    pub public_directory: PathBuf,
    pub assets_dir: String,
    pub basename: String,
    pub assets_max_age: u64,
    pub public_max_age: u64,
}

impl BuildLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_directory: config.build.client_directory(),
            public_directory: config.build.public_dir.clone(),
            assets_dir: config.build.assets_dir.clone(),
            basename: config.build.basename.clone(),
            assets_max_age: config.static_files.assets_max_age,
            public_max_age: config.static_files.public_max_age,
        }
    }
}

impl Default for BuildLayout {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the adapters need besides the user's options.
#[derive(Clone)]
pub struct AppContext {
    pub mode: Mode,
    pub runtime: Runtime,
    pub build: BuildSource,
    pub handler: Arc<dyn RequestHandler>,
    pub layout: BuildLayout,
    pub hostname: String,
    /// Server the app is mounted on in development.
    pub dev_server: Option<DevServer>,
}

impl AppContext {
    /// Context for `runtime` running in the build source's mode.
    pub fn new(build: BuildSource, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            mode: build.mode(),
            runtime: Runtime::default(),
            build,
            handler,
            layout: BuildLayout::default(),
            hostname: "0.0.0.0".to_string(),
            dev_server: None,
        }
    }

    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn layout(mut self, layout: BuildLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn dev_server(mut self, dev: DevServer) -> Self {
        self.dev_server = Some(dev);
        self
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("mode", &self.mode)
            .field("runtime", &self.runtime)
            .field("build", &self.build)
            .field("layout", &self.layout)
            .field("hostname", &self.hostname)
            .field("dev_server", &self.dev_server)
            .finish_non_exhaustive()
    }
}

/// The assembled router and the upgrade capability it was built with.
#[derive(Clone)]
pub struct AssembledApp {
    pub router: Router,
    pub upgrade: UpgradeCapability,
    pub mode: Mode,
}

impl fmt::Debug for AssembledApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledApp")
            .field("upgrade", &self.upgrade.name())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

struct Renderer {
    build: BuildSource,
    handler: Arc<dyn RequestHandler>,
    get_load_context: Option<GetLoadContext>,
    on_error: Option<OnError>,
    basename: String,
}

impl Renderer {
    async fn respond(&self, request: Request) -> Response {
        if !under_basename(&self.basename, request.uri().path()) {
            return StatusCode::NOT_FOUND.into_response();
        }
        match render(
            &self.build,
            self.handler.as_ref(),
            self.get_load_context.as_ref(),
            request,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => match &self.on_error {
                Some(hook) => hook(e),
                None => e.into_response(),
            },
        }
    }
}

/// Whether `path` belongs to the app mounted at `basename`, including the
/// `{basename}.data` single-fetch endpoint.
pub fn under_basename(basename: &str, path: &str) -> bool {
    let base = basename.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    match path.strip_prefix(base) {
        Some("") | Some(".data") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Build the application router for `ctx` with the user's `options`.
pub fn assemble(ctx: &AppContext, options: &ServerOptions) -> AssembledApp {
    let upgrade = negotiate(options.use_websocket, &ctx.runtime, ctx.mode);
    debug!(
        mode = %ctx.mode,
        runtime = %ctx.runtime,
        upgrade = upgrade.name(),
        "assembling app"
    );

    let renderer = Arc::new(Renderer {
        build: ctx.build.clone(),
        handler: Arc::clone(&ctx.handler),
        get_load_context: options.get_load_context.clone(),
        on_error: options.on_error.clone(),
        basename: ctx.layout.basename.clone(),
    });
    let mut app = Router::new().fallback(move |request: Request| {
        let renderer = Arc::clone(&renderer);
        async move { renderer.respond(request).await }
    });

    if let Some(configure) = &options.configure {
        app = configure(app, options.use_websocket.then_some(&upgrade));
    }
    if let Some(routes) = upgrade.in_app_routes() {
        app = app.layer(from_fn_with_state(routes, upgrade_layer));
    }
    if options.default_logger {
        app = app.layer(from_fn(log_requests));
    }

    if options.serve_static {
        let layout = &ctx.layout;
        let production = ctx.mode.is_production();
        let public_root = if production {
            layout.client_directory.clone()
        } else {
            layout.public_directory.clone()
        };
        let public = StaticFiles::new("/", public_root)
            .max_age(if production { layout.public_max_age } else { 0 });
        let assets = StaticFiles::new(format!("/{}", layout.assets_dir), &layout.client_directory)
            .max_age(if production { layout.assets_max_age } else { 0 })
            .immutable(production);

        app = app
            .layer(from_fn_with_state(Arc::new(public), serve_static))
            .layer(from_fn_with_state(Arc::new(assets), serve_static));
    }

    if let Some(before_all) = &options.before_all {
        app = before_all(app);
    }
    if ctx.mode.is_development() {
        app = app.layer(from_fn(bind_socket_info));
    }

    AssembledApp {
        router: app,
        upgrade,
        mode: ctx.mode,
    }
}
