//! Request logging middleware.

use crate::telemetry::{RequestTimer, format_elapsed, spans};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info};

/// Log `<-- METHOD path` on the way in and `--> METHOD path status time` on
/// the way out.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.to_string());
    let span = spans::request(&method, &path);

    async move {
        info!("<-- {method} {path}");
        let timer = RequestTimer::start();
        let response = next.run(request).await;
        let status = response.status().as_u16();
        let elapsed = format_elapsed(timer.elapsed());
        info!(status, elapsed = %elapsed, "--> {method} {path} {status} {elapsed}");
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn passes_response_through() {
        let app = Router::new()
            .route("/ok", get(|| async { (StatusCode::ACCEPTED, "fine") }))
            .layer(axum::middleware::from_fn(log_requests));

        let response = app
            .oneshot(
                http::Request::get("/ok?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
