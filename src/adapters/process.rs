//! Process runtime: one long-lived server owning its socket.

use super::{Deployment, listen_port, mount_dev};
use crate::app::{AppContext, ServerOptions, assemble};
use crate::error::AdapterError;
use crate::mode::Mode;
use crate::shutdown::LiveServer;
use crate::upgrade::ProcessServer;
use tokio::net::TcpListener;
use tracing::info;

/// Assemble the app and, in production, start listening. Upgrade handlers
/// are attached to the server's upgrade event source before the first
/// connection is accepted.
pub async fn create_process_server(
    ctx: AppContext,
    options: ServerOptions,
) -> Result<Deployment, AdapterError> {
    let app = assemble(&ctx, &options);

    match ctx.mode {
        Mode::Production => {
            let server = ProcessServer::new();
            app.upgrade.bind_server(server.clone());

            let port = listen_port(&options);
            let listener = TcpListener::bind((ctx.hostname.as_str(), port)).await?;
            let live = LiveServer::spawn_process(server, listener, app.router)?;
            Ok(Deployment::Live(live))
        }
        Mode::Development => mount_dev(&ctx, app),
        Mode::Test => {
            info!("Test mode, app not served");
            Ok(Deployment::App(app))
        }
    }
}
