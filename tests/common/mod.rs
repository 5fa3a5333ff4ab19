//! Integration test common infrastructure.
//!
//! Provides in-process servers on ephemeral ports, a stub rendering
//! handler, and a WebSocket test client.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestSocket;
#[allow(unused_imports)]
pub use server::{Echo, PageHandler, TestDevServer, context, spawn_process};
