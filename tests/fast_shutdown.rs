//! Integration tests for the fast runtime's graceful shutdown.

mod common;

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use common::{Echo, TestSocket, context};
use ssr_gateway::adapters::{Deployment, create_fast_server};
use ssr_gateway::app::ServerOptions;
use ssr_gateway::error::{AdapterError, BoxError};
use ssr_gateway::mode::Mode;
use ssr_gateway::runtime::Runtime;
use ssr_gateway::shutdown::SignalSource;
use ssr_gateway::upgrade::UpgradeCapability;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Delivers one signal when the test says so.
struct ManualSignal(Option<oneshot::Receiver<&'static str>>);

#[async_trait]
impl SignalSource for ManualSignal {
    async fn recv(&mut self) -> &'static str {
        match self.0.take() {
            Some(rx) => rx.await.unwrap_or("SIGTERM"),
            None => std::future::pending().await,
        }
    }
}

fn options(cleanups: Arc<AtomicUsize>, fail: bool) -> ServerOptions {
    ServerOptions::new()
        .port(0)
        .serve_static(false)
        .use_websocket(true)
        .configure(|app: Router, ws: Option<&UpgradeCapability>| {
            if let Some(ws) = ws {
                ws.upgrade_websocket("/ws", |_| Echo);
            }
            app.route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    "done"
                }),
            )
        })
        .on_graceful_shutdown(move || {
            let cleanups = Arc::clone(&cleanups);
            async move {
                cleanups.fetch_add(1, Ordering::SeqCst);
                if fail {
                    return Err::<(), BoxError>("cache flush failed".into());
                }
                Ok(())
            }
        })
}

#[tokio::test]
async fn test_in_flight_requests_finish_before_cleanup() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let deployment = create_fast_server(
        context(Mode::Production, Runtime::Fast),
        options(cleanups.clone(), false),
    )
    .await
    .expect("server");
    let Deployment::Managed(coordinator) = deployment else {
        panic!("graceful shutdown should be armed");
    };
    let addr = coordinator.local_addr();

    let (signal, rx) = oneshot::channel();
    let shutdown = tokio::spawn(coordinator.run(ManualSignal(Some(rx))));

    let slow = tokio::spawn(reqwest::get(format!("http://{addr}/slow")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    signal.send("SIGTERM").expect("signal");

    let response = slow.await.expect("join").expect("slow request");
    assert_eq!(response.text().await.expect("body"), "done");

    let received = shutdown.await.expect("join").expect("shutdown");
    assert_eq!(received, "SIGTERM");
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    assert!(reqwest::get(format!("http://{addr}/slow")).await.is_err());
}

#[tokio::test]
async fn test_descriptor_serves_sockets() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let deployment = create_fast_server(
        context(Mode::Production, Runtime::Fast),
        options(cleanups.clone(), false),
    )
    .await
    .expect("server");
    let addr = deployment.local_addr().expect("listening");

    let mut socket = TestSocket::connect(addr, "/ws", None).await.expect("connect");
    socket.send_text("fast").await.expect("send");
    assert_eq!(socket.recv_text().await.expect("echo"), "fast");
}

#[tokio::test]
async fn test_failed_cleanup_is_reported() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let deployment = create_fast_server(
        context(Mode::Production, Runtime::Fast),
        options(cleanups.clone(), true),
    )
    .await
    .expect("server");
    let Deployment::Managed(coordinator) = deployment else {
        panic!("graceful shutdown should be armed");
    };

    let (signal, rx) = oneshot::channel();
    signal.send("SIGINT").expect("signal");
    let err = coordinator
        .run(ManualSignal(Some(rx)))
        .await
        .expect_err("cleanup fails");

    assert!(matches!(err, AdapterError::Cleanup(_)));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}
