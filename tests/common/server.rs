//! Test server management.
//!
//! Everything runs inside the test's own runtime; ports are always
//! ephemeral so tests can run in parallel.

use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use ssr_gateway::adapters::{Deployment, create_process_server, create_server};
use ssr_gateway::app::{AppContext, ServerOptions};
use ssr_gateway::build::{BuildSource, ServerBuild, StaticBuildLoader};
use ssr_gateway::config::DevConfig;
use ssr_gateway::dev::DevServer;
use ssr_gateway::error::BoxError;
use ssr_gateway::mode::Mode;
use ssr_gateway::render::{LoadContext, RequestHandler};
use ssr_gateway::runtime::Runtime;
use ssr_gateway::shutdown::LiveServer;
use ssr_gateway::upgrade::{Message, SocketContext, SocketHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Renders `page <mode> <path>`.
pub struct PageHandler;

#[async_trait]
impl RequestHandler for PageHandler {
    async fn handle(
        &self,
        _build: Arc<ServerBuild>,
        mode: Mode,
        request: http::Request<Body>,
        _context: LoadContext,
    ) -> Result<Response, BoxError> {
        Ok(format!("page {mode} {}", request.uri().path()).into_response())
    }
}

/// Sends every text or binary frame straight back.
pub struct Echo;

#[async_trait]
impl SocketHandler for Echo {
    async fn on_message(&mut self, message: Message, ctx: &SocketContext) {
        ctx.send(message);
    }
}

/// App context for `runtime` in `mode`, bound to loopback.
pub fn context(mode: Mode, runtime: Runtime) -> AppContext {
    let build = BuildSource::new(
        Arc::new(StaticBuildLoader::new(ServerBuild::default())),
        mode,
    );
    AppContext::new(build, Arc::new(PageHandler))
        .runtime(runtime)
        .hostname("127.0.0.1")
}

/// Start a production process server.
pub async fn spawn_process(options: ServerOptions) -> anyhow::Result<LiveServer> {
    let deployment =
        create_process_server(context(Mode::Production, Runtime::Process), options.port(0))
            .await?;
    match deployment {
        Deployment::Live(server) => Ok(server),
        other => anyhow::bail!("expected a live server, got {other:?}"),
    }
}

/// A development server with an app mounted, serving on loopback.
pub struct TestDevServer {
    pub dev: DevServer,
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestDevServer {
    /// Mount an app assembled for `runtime` with `options` and start serving.
    pub async fn spawn(runtime: Runtime, options: ServerOptions) -> anyhow::Result<Self> {
        let dev = DevServer::new(&DevConfig::default())?;
        let ctx = context(Mode::Development, runtime).dev_server(dev.clone());
        let deployment = create_server(ctx, options).await?;
        anyhow::ensure!(
            deployment.kind() == "dev",
            "expected a dev deployment, got {deployment:?}"
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();
        let server = dev.clone();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        Ok(Self {
            dev,
            addr,
            stop: Some(stop),
            task,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await??;
        Ok(())
    }
}
