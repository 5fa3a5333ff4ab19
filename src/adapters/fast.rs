//! Fast runtime: the server is started from a launch descriptor.

use super::{Deployment, listen_port, mount_dev};
use crate::app::{AppContext, ServerOptions, assemble};
use crate::error::AdapterError;
use crate::mode::Mode;
use crate::shutdown::ShutdownCoordinator;
use crate::upgrade::ServeDescriptor;
use tracing::info;

/// Assemble the app into a descriptor. In production the descriptor is
/// bound to the upgrade capability and launched; with an
/// `on_graceful_shutdown` hook the returned deployment also owns the
/// shutdown sequence.
pub async fn create_fast_server(
    ctx: AppContext,
    options: ServerOptions,
) -> Result<Deployment, AdapterError> {
    let app = assemble(&ctx, &options);
    let descriptor = ServeDescriptor::new(app.router.clone(), listen_port(&options))
        .hostname(ctx.hostname.clone())
        .development(!ctx.mode.is_production());

    match ctx.mode {
        Mode::Production => {
            let descriptor = app
                .upgrade
                .bind_server(descriptor.clone())
                .into_descriptor()
                .unwrap_or(descriptor);
            let live = descriptor.launch().await?;

            match options.on_graceful_shutdown {
                Some(callback) => {
                    info!("Graceful shutdown enabled");
                    Ok(Deployment::Managed(ShutdownCoordinator::new(live, callback)))
                }
                None => Ok(Deployment::Live(live)),
            }
        }
        Mode::Development => mount_dev(&ctx, app),
        Mode::Test => Ok(Deployment::Descriptor(descriptor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildSource, ServerBuild, StaticBuildLoader};
    use crate::error::BoxError;
    use crate::render::{LoadContext, RequestHandler};
    use crate::runtime::Runtime;
    use crate::upgrade::UpgradeCapability;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::response::{IntoResponse, Response};
    use std::sync::Arc;

    struct Ok200;

    #[async_trait]
    impl RequestHandler for Ok200 {
        async fn handle(
            &self,
            _build: Arc<ServerBuild>,
            _mode: Mode,
            _request: http::Request<Body>,
            _context: LoadContext,
        ) -> Result<Response, BoxError> {
            Ok("ok".into_response())
        }
    }

    fn context(mode: Mode) -> AppContext {
        let build = BuildSource::new(Arc::new(StaticBuildLoader::new(ServerBuild::default())), mode);
        AppContext::new(build, Arc::new(Ok200))
            .runtime(Runtime::Fast)
            .hostname("127.0.0.1")
    }

    #[tokio::test]
    async fn test_mode_returns_unbound_descriptor() {
        let options = ServerOptions::new()
            .port(4567)
            .use_websocket(true)
            .configure(|app: Router, ws: Option<&UpgradeCapability>| {
                assert_eq!(ws.map(UpgradeCapability::name), Some("fast"));
                app
            });
        let deployment = create_fast_server(context(Mode::Test), options).await.unwrap();
        let Deployment::Descriptor(descriptor) = deployment else {
            panic!("expected a descriptor");
        };
        assert_eq!(descriptor.port, 4567);
        assert!(descriptor.development);
        assert!(descriptor.websocket.is_none());
    }

    #[tokio::test]
    async fn production_with_cleanup_is_managed() {
        let options = ServerOptions::new()
            .port(0)
            .on_graceful_shutdown(|| async { Ok::<(), BoxError>(()) });
        let deployment = create_fast_server(context(Mode::Production), options)
            .await
            .unwrap();
        assert_eq!(deployment.kind(), "managed");
        assert!(deployment.local_addr().is_some());
    }

    #[tokio::test]
    async fn production_without_cleanup_is_live() {
        let deployment = create_fast_server(context(Mode::Production), ServerOptions::new().port(0))
            .await
            .unwrap();
        let Deployment::Live(server) = deployment else {
            panic!("expected a live server");
        };
        server.stop().await.unwrap();
    }
}
