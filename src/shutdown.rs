//! Running servers and graceful shutdown.
//!
//! A [`LiveServer`] owns the accept loop of a launched server and the
//! channel that stops it. [`ShutdownCoordinator`] waits for a termination
//! signal, stops the server while in-flight requests drain, then runs the
//! user cleanup callback. It is consumed by [`ShutdownCoordinator::run`], so
//! a second signal can never start a second shutdown.

use crate::error::{AdapterError, BoxError};
use crate::upgrade::ProcessServer;
use async_trait::async_trait;
use axum::Router;
use futures_util::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// User cleanup hook run once after the server has stopped.
pub type ShutdownCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A launched server.
pub struct LiveServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl LiveServer {
    /// Bind `addr` and serve `app` on a background task.
    pub async fn launch_router(addr: impl ToSocketAddrs, app: Router) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = stopped.await;
            })
            .await
        });

        info!(%addr, "Started server: http://{addr}");
        Ok(Self {
            addr,
            stop: Some(stop),
            task,
        })
    }

    /// Serve `app` through a process server so its upgrade event source sees
    /// every upgrade request.
    pub fn spawn_process(server: ProcessServer, listener: TcpListener, app: Router) -> io::Result<Self> {
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server
                .serve(listener, app, async {
                    let _ = stopped.await;
                })
                .await
        });

        info!(%addr, "Started server: http://{addr}");
        Ok(Self {
            addr,
            stop: Some(stop),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait for in-flight requests to finish.
    pub async fn stop(mut self) -> io::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.map_err(io::Error::other)?
    }

    /// Run until the server exits on its own.
    pub async fn wait(self) -> io::Result<()> {
        let Self { stop, task, .. } = self;
        let result = task.await.map_err(io::Error::other)?;
        drop(stop);
        result
    }
}

impl std::fmt::Debug for LiveServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveServer").field("addr", &self.addr).finish_non_exhaustive()
    }
}

/// Source of termination signals.
#[async_trait]
pub trait SignalSource: Send {
    /// Resolve with the signal name once one arrives.
    async fn recv(&mut self) -> &'static str;
}

/// SIGTERM and SIGINT from the operating system.
#[derive(Debug, Default)]
pub struct OsSignals;

#[async_trait]
impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut term), Ok(mut int)) => tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            },
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// Owned graceful-shutdown state for one launched server.
pub struct ShutdownCoordinator {
    server: LiveServer,
    callback: ShutdownCallback,
}

impl ShutdownCoordinator {
    pub fn new(server: LiveServer, callback: ShutdownCallback) -> Self {
        Self { server, callback }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Wait for a signal, then stop the server and run the cleanup callback.
    /// Returns the name of the signal that triggered the shutdown.
    pub async fn run<S: SignalSource>(self, mut signals: S) -> Result<&'static str, AdapterError> {
        let signal = signals.recv().await;
        info!(signal, "Received {signal}, shutting down gracefully");

        self.server.stop().await?;
        info!("Server stopped, all requests completed");

        info!("Running cleanup tasks");
        if let Err(e) = (self.callback)().await {
            error!(error = %e, "Shutdown failed");
            return Err(AdapterError::Cleanup(e));
        }
        info!("Graceful shutdown completed");
        Ok(signal)
    }
}
