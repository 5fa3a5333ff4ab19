//! ssr-gateway - runtime adapters for a server-rendering request handler.
//!
//! The same assembled axum app runs on three kinds of runtime: a
//! long-lived process server, a descriptor-launched fast server, and an
//! edge platform that owns the socket. WebSocket upgrades are offered
//! through one [`UpgradeCapability`](upgrade::UpgradeCapability) whatever
//! the runtime, and in development a single dev server arbitrates between
//! user sockets and the hot-reload channel.

pub mod adapters;
pub mod app;
pub mod build;
pub mod config;
pub mod dev;
pub mod error;
pub mod mode;
pub mod redirect;
pub mod render;
pub mod runtime;
pub mod shutdown;
pub mod telemetry;
pub mod upgrade;

pub use adapters::{Deployment, create_server};
pub use app::{AppContext, AssembledApp, BuildLayout, ServerOptions, assemble};
pub use mode::{Mode, get_build_mode, get_mode};
pub use runtime::Runtime;
