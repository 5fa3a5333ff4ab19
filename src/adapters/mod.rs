//! Runtime entry points.
//!
//! Each adapter assembles the app and then does what its runtime expects:
//! listen, hand back a launch descriptor, or hand back the router. In
//! development every adapter mounts onto the shared [`DevServer`] instead.

pub mod edge;
pub mod fast;
pub mod process;

pub use edge::create_edge_app;
pub use fast::create_fast_server;
pub use process::create_process_server;

use crate::app::{AppContext, AssembledApp, ServerOptions};
use crate::config::{PORT_ENV, resolve_port};
use crate::dev::DevServer;
use crate::error::AdapterError;
use crate::runtime::Runtime;
use crate::shutdown::{LiveServer, ShutdownCoordinator};
use crate::upgrade::ServeDescriptor;
use axum::Router;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// What an adapter produced.
pub enum Deployment {
    /// Listening.
    Live(LiveServer),
    /// Listening, with graceful shutdown armed.
    Managed(ShutdownCoordinator),
    /// Mounted on the development server.
    Dev(DevServer),
    /// Assembled but not served; the caller decides how.
    App(AssembledApp),
    /// Launch description for a caller that starts the server itself.
    Descriptor(ServeDescriptor),
}

impl Deployment {
    pub fn kind(&self) -> &'static str {
        match self {
            Deployment::Live(_) => "live",
            Deployment::Managed(_) => "managed",
            Deployment::Dev(_) => "dev",
            Deployment::App(_) => "app",
            Deployment::Descriptor(_) => "descriptor",
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Deployment::Live(server) => Some(server.local_addr()),
            Deployment::Managed(coordinator) => Some(coordinator.local_addr()),
            _ => None,
        }
    }

    /// The router of an unserved deployment.
    pub fn into_router(self) -> Option<Router> {
        match self {
            Deployment::App(app) => Some(app.router),
            Deployment::Descriptor(descriptor) => Some(descriptor.into_router()),
            _ => None,
        }
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("kind", &self.kind())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Run the adapter matching `ctx.runtime`. An unrecognized runtime is
/// served like the process runtime, without upgrade support.
pub async fn create_server(
    ctx: AppContext,
    options: ServerOptions,
) -> Result<Deployment, AdapterError> {
    match &ctx.runtime {
        Runtime::Process => create_process_server(ctx, options).await,
        Runtime::Fast => create_fast_server(ctx, options).await,
        Runtime::Edge => create_edge_app(ctx, options),
        Runtime::Other(id) => {
            debug!(runtime = %id, "unrecognized runtime, serving as process");
            create_process_server(ctx, options).await
        }
    }
}

/// Explicit port, then `$PORT`, then the default.
pub(crate) fn listen_port(options: &ServerOptions) -> u16 {
    resolve_port(options.port, std::env::var(PORT_ENV).ok().as_deref())
}

/// Development: hand the app to the dev server, which runs the upgrade
/// arbiter for it.
pub(crate) fn mount_dev(ctx: &AppContext, app: AssembledApp) -> Result<Deployment, AdapterError> {
    match &ctx.dev_server {
        Some(dev) => {
            dev.mount(app.router, &app.upgrade)?;
            Ok(Deployment::Dev(dev.clone()))
        }
        None => {
            warn!("development mode without a dev server, returning the app unserved");
            Ok(Deployment::App(app))
        }
    }
}
