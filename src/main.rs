//! ssr-gateway - serve a rendering process behind the configured runtime.

use anyhow::Context;
use ssr_gateway::adapters::{Deployment, create_server};
use ssr_gateway::app::{AppContext, BuildLayout, ServerOptions};
use ssr_gateway::build::{BuildSource, FileBuildLoader};
use ssr_gateway::config::{Config, validate};
use ssr_gateway::dev::DevServer;
use ssr_gateway::error::BoxError;
use ssr_gateway::mode::{Mode, get_mode};
use ssr_gateway::render::UpstreamRenderer;
use ssr_gateway::shutdown::{LiveServer, OsSignals, SignalSource};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    let mode = get_mode().unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to production mode");
        Mode::Production
    });

    info!(
        mode = %mode,
        runtime = %config.server.runtime,
        render_url = %config.server.render_url,
        "Starting ssr-gateway"
    );

    let render_url = config
        .server
        .render_url
        .parse()
        .context("server.render_url")?;
    let build = BuildSource::new(
        Arc::new(FileBuildLoader::new(config.build.server_build_path())),
        mode,
    );
    let mut ctx = AppContext::new(build, Arc::new(UpstreamRenderer::new(render_url)))
        .runtime(config.server.runtime.clone())
        .layout(BuildLayout::from_config(&config))
        .hostname(config.server.hostname.clone());

    let mut options = ServerOptions::new()
        .port(config.server.port())
        .default_logger(config.server.default_logger)
        .serve_static(config.static_files.enabled);
    if config.server.graceful_shutdown {
        options = options.on_graceful_shutdown(|| async {
            info!("No cleanup tasks registered");
            Ok::<(), BoxError>(())
        });
    }

    let dev = if mode.is_development() {
        let dev = DevServer::new(&config.dev)?;
        ctx = ctx.dev_server(dev.clone());
        Some(dev)
    } else {
        None
    };

    let mut signals = OsSignals;
    match create_server(ctx, options).await? {
        Deployment::Live(server) => {
            tokio::select! {
                result = server.wait() => result?,
                signal = signals.recv() => info!(signal, "Received {signal}, exiting"),
            }
        }
        Deployment::Managed(coordinator) => {
            coordinator.run(signals).await?;
        }
        Deployment::Dev(dev) => {
            let listener =
                TcpListener::bind((config.server.hostname.as_str(), config.server.port())).await?;
            info!(addr = %listener.local_addr()?, "Dev server started");
            dev.serve(listener, async {
                signals.recv().await;
            })
            .await?;
        }
        deployment @ (Deployment::App(_) | Deployment::Descriptor(_)) => {
            if dev.is_some() {
                warn!("Dev server was not mounted");
            }
            let Some(router) = deployment.into_router() else {
                anyhow::bail!("nothing to serve");
            };
            // The edge platform is not present locally: serve the app directly.
            let addr = (config.server.hostname.clone(), config.server.port());
            let server = LiveServer::launch_router(addr, router).await?;
            tokio::select! {
                result = server.wait() => result?,
                signal = signals.recv() => info!(signal, "Received {signal}, exiting"),
            }
        }
    }

    Ok(())
}
