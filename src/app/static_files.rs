//! Static file serving with cache headers.
//!
//! A [`StaticFiles`] instance answers GET/HEAD requests under its prefix from
//! a directory on disk. Anything it cannot answer falls through to the next
//! layer untouched.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// One static directory mounted under a URL prefix.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    prefix: String,
    root: PathBuf,
    max_age: u64,
    immutable: bool,
}

impl StaticFiles {
    /// Serve `root` for request paths starting with `prefix`. The full
    /// request path is looked up under `root`, prefix included.
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            root: root.into(),
            max_age: 0,
            immutable: false,
        }
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_control(&self) -> String {
        if self.immutable {
            format!("public, max-age={}, immutable", self.max_age)
        } else {
            format!("public, max-age={}", self.max_age)
        }
    }

    fn covers(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        prefix.is_empty()
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Map a request path to a file under the root. Segments are
    /// percent-decoded first; parent segments, backslashes, NULs and
    /// invalid UTF-8 are refused outright.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        if !self.covers(path) {
            return None;
        }
        let mut file = self.root.clone();
        for raw in path.split('/') {
            let segment = percent_decode_str(raw).decode_utf8().ok()?;
            match &*segment {
                "" | "." => continue,
                ".." => return None,
                s if s.contains(['\\', '/', '\0']) => return None,
                s => file.push(s),
            }
        }
        Some(file)
    }

    /// The response for `path`, or `None` when this directory has nothing
    /// to serve for it.
    pub async fn lookup(&self, method: &Method, path: &str) -> Option<Response> {
        if method != Method::GET && method != Method::HEAD {
            return None;
        }
        let mut file = self.resolve(path)?;
        let mut meta = tokio::fs::metadata(&file).await.ok()?;
        if meta.is_dir() {
            file.push("index.html");
            meta = tokio::fs::metadata(&file).await.ok()?;
        }
        if !meta.is_file() {
            return None;
        }

        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(tokio::fs::read(&file).await.ok()?)
        };
        trace!(path, file = %file.display(), "static hit");

        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&file)));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(meta.len()));
        if let Ok(value) = HeaderValue::from_str(&self.cache_control()) {
            headers.insert(CACHE_CONTROL, value);
        }
        Some(response)
    }
}

/// Middleware entry point, mounted with `from_fn_with_state`.
pub async fn serve_static(
    State(files): State<Arc<StaticFiles>>,
    request: Request,
    next: Next,
) -> Response {
    match files.lookup(request.method(), request.uri().path()).await {
        Some(response) => response,
        None => next.run(request).await,
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("webmanifest") => "application/manifest+json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
