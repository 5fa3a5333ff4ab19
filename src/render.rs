//! Request delegation to the rendering handler.
//!
//! The handler is a black box behind [`RequestHandler`]. Before calling it,
//! [`render`] resolves the build and the per-request load context.

use crate::build::{BuildSource, ServerBuild};
use crate::error::{BoxError, RenderError};
use crate::mode::Mode;
use async_trait::async_trait;
use axum::body::Body;
use futures_util::future::BoxFuture;
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::request::Parts;
use http::{HeaderValue, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Header carrying the serialized load context to an upstream renderer.
pub const CONTEXT_HEADER: &str = "x-load-context";
/// Header carrying the run mode to an upstream renderer.
pub const MODE_HEADER: &str = "x-render-mode";

const MAX_FORWARDED_BODY: usize = 16 * 1024 * 1024;

/// Per-request values handed to the rendering handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadContext(Map<String, Value>);

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Second argument of the load-context callback.
#[derive(Debug, Clone)]
pub struct LoadContextArgs {
    pub build: Arc<ServerBuild>,
    pub mode: Mode,
}

/// A load context that is either already computed or still pending.
pub enum ContextFuture {
    Ready(Result<LoadContext, BoxError>),
    Pending(BoxFuture<'static, Result<LoadContext, BoxError>>),
}

impl ContextFuture {
    pub fn ready(context: LoadContext) -> Self {
        ContextFuture::Ready(Ok(context))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<LoadContext, BoxError>> + Send + 'static,
    {
        ContextFuture::Pending(Box::pin(future))
    }

    pub async fn resolve(self) -> Result<LoadContext, BoxError> {
        match self {
            ContextFuture::Ready(result) => result,
            ContextFuture::Pending(future) => future.await,
        }
    }
}

impl From<LoadContext> for ContextFuture {
    fn from(context: LoadContext) -> Self {
        ContextFuture::ready(context)
    }
}

/// User callback producing the load context for one request.
pub type GetLoadContext = Arc<dyn Fn(&Parts, &LoadContextArgs) -> ContextFuture + Send + Sync>;

/// The rendering framework's request handler.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        build: Arc<ServerBuild>,
        mode: Mode,
        request: Request<Body>,
        context: LoadContext,
    ) -> Result<Response<Body>, BoxError>;
}

/// Resolve build and context, then hand `request` to `handler`. The
/// handler's response is returned verbatim.
pub async fn render(
    source: &BuildSource,
    handler: &dyn RequestHandler,
    get_load_context: Option<&GetLoadContext>,
    request: Request<Body>,
) -> Result<Response<Body>, RenderError> {
    let build = source.resolve().await?;
    let mode = source.mode();
    let (parts, body) = request.into_parts();

    let context = match get_load_context {
        Some(get_load_context) => {
            let args = LoadContextArgs {
                build: Arc::clone(&build),
                mode,
            };
            get_load_context(&parts, &args)
                .resolve()
                .await
                .map_err(RenderError::Context)?
        }
        None => LoadContext::default(),
    };

    handler
        .handle(build, mode, Request::from_parts(parts, body), context)
        .await
        .map_err(RenderError::Handler)
}

/// Forwards requests to a rendering process over HTTP.
///
/// The load context travels as JSON in [`CONTEXT_HEADER`]; the upstream
/// response body is streamed back untouched.
#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl UpstreamRenderer {
    /// Requests are forwarded below `base`, path prefix included.
    pub fn new(mut base: reqwest::Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    pub fn base(&self) -> &reqwest::Url {
        &self.base
    }

    fn target_url(&self, target: &str) -> Result<reqwest::Url, BoxError> {
        Ok(self.base.join(target.trim_start_matches('/'))?)
    }
}

#[async_trait]
impl RequestHandler for UpstreamRenderer {
    async fn handle(
        &self,
        _build: Arc<ServerBuild>,
        mode: Mode,
        request: Request<Body>,
        context: LoadContext,
    ) -> Result<Response<Body>, BoxError> {
        let (parts, body) = request.into_parts();
        let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = self.target_url(target)?;

        let mut headers = parts.headers;
        headers.remove(HOST);
        headers.remove(CONNECTION);
        let context = serde_json::to_vec(&context)?;
        headers.insert(CONTEXT_HEADER, HeaderValue::from_bytes(&context)?);
        headers.insert(MODE_HEADER, HeaderValue::from_static(mode.as_str()));

        let body = axum::body::to_bytes(body, MAX_FORWARDED_BODY).await?;
        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::StaticBuildLoader;
    use axum::Router;
    use http::{HeaderMap, StatusCode};

    struct EchoContext;

    #[async_trait]
    impl RequestHandler for EchoContext {
        async fn handle(
            &self,
            build: Arc<ServerBuild>,
            mode: Mode,
            request: Request<Body>,
            context: LoadContext,
        ) -> Result<Response<Body>, BoxError> {
            let text = format!(
                "{} {} {} {}",
                mode,
                build.basename,
                request.uri().path(),
                serde_json::to_string(&context)?
            );
            Ok(Response::new(Body::from(text)))
        }
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn source() -> BuildSource {
        BuildSource::new(
            Arc::new(StaticBuildLoader::new(ServerBuild::default())),
            Mode::Production,
        )
    }

    fn get(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn empty_context_without_callback() {
        let response = render(&source(), &EchoContext, None, get("/about"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "production / /about {}");
    }

    #[tokio::test]
    async fn ready_and_pending_contexts() {
        let ready: GetLoadContext = Arc::new(|parts: &Parts, args: &LoadContextArgs| {
            LoadContext::new()
                .with("path", parts.uri.path())
                .with("mode", args.mode.as_str())
                .into()
        });
        let response = render(&source(), &EchoContext, Some(&ready), get("/a"))
            .await
            .unwrap();
        assert_eq!(
            body_text(response).await,
            r#"production / /a {"mode":"production","path":"/a"}"#
        );

        let pending: GetLoadContext = Arc::new(|_: &Parts, _: &LoadContextArgs| {
            ContextFuture::pending(async {
                tokio::task::yield_now().await;
                Ok(LoadContext::new().with("user", 7))
            })
        });
        let response = render(&source(), &EchoContext, Some(&pending), get("/b"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, r#"production / /b {"user":7}"#);
    }

    #[tokio::test]
    async fn context_errors_are_not_swallowed() {
        let failing: GetLoadContext =
            Arc::new(|_: &Parts, _: &LoadContextArgs| ContextFuture::Ready(Err("session store down".into())));
        let err = render(&source(), &EchoContext, Some(&failing), get("/"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Context(_)));
        assert!(err.to_string().contains("session store down"));
    }

    #[tokio::test]
    async fn upstream_receives_context_and_mode() {
        let upstream = Router::new().fallback(|headers: HeaderMap, uri: http::Uri| async move {
            let context = headers[CONTEXT_HEADER].to_str().unwrap().to_string();
            let mode = headers[MODE_HEADER].to_str().unwrap().to_string();
            (StatusCode::CREATED, format!("{uri} {mode} {context}"))
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, upstream).await });

        let renderer = UpstreamRenderer::new(format!("http://{addr}").parse().unwrap());
        let response = renderer
            .handle(
                Arc::new(ServerBuild::default()),
                Mode::Test,
                get("/page?x=1"),
                LoadContext::new().with("k", "v"),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_text(response).await, r#"/page?x=1 test {"k":"v"}"#);
    }

    #[test]
    fn upstream_keeps_base_path_prefix() {
        let renderer = UpstreamRenderer::new("http://127.0.0.1:3001/render".parse().unwrap());
        assert_eq!(renderer.base().as_str(), "http://127.0.0.1:3001/render/");
        assert_eq!(
            renderer.target_url("/page?x=1").unwrap().as_str(),
            "http://127.0.0.1:3001/render/page?x=1"
        );

        let root = UpstreamRenderer::new("http://127.0.0.1:3001".parse().unwrap());
        assert_eq!(
            root.target_url("/").unwrap().as_str(),
            "http://127.0.0.1:3001/"
        );
    }
}
