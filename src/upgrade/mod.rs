//! Connection upgrades: listeners, sockets, and per-runtime negotiation.

pub mod handshake;
pub mod listeners;
pub mod negotiator;
pub mod routes;
pub mod server;
pub mod socket;

pub use listeners::{
    ListenerEntry, ListenerId, ListenerRegistry, UpgradeListener, UpgradeRequest, listener,
};
pub use negotiator::{
    EdgeNegotiator, FastNegotiator, NoopNegotiator, ProcessNegotiator, UPGRADE_INJECTOR_NAME,
    UpgradeCapability, UpgradeNegotiator, negotiate,
};
pub use routes::{UpgradeRoutes, upgrade_layer};
pub use server::{ProcessServer, ServeDescriptor, ServerHandle};
pub use socket::{
    HandlerFactory, Message, SocketContext, SocketHandler, UpgradeSocket, handler_factory,
};
