//! Development mode: the shared dev server, its hot-reload channel, and the
//! arbiter keeping user upgrade listeners away from hot-reload traffic.

pub mod arbiter;
pub mod hmr;
pub mod server;

pub use arbiter::{
    ArbiterState, HMR_LISTENER_NAME, HMR_PROTOCOL, UpgradeArbiter, clean_upgrade_listeners,
    patch_upgrade_listeners,
};
pub use hmr::HotReloadChannel;
pub use server::{DevServer, ExcludeSet};
