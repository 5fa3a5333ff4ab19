//! Redirects the client router can follow without a full document load.

use axum::body::Body;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{Response, StatusCode};
use serde_json::json;

/// A single-fetch redirect to `location`.
///
/// The client router sees a `202` with the turbo-stream encoded redirect
/// payload and performs a document reload to `location`.
pub fn single_fetch_redirect(location: &str) -> Result<Response<Body>, http::Error> {
    let payload = json!([
        ["SingleFetchRedirect", 1],
        { "_2": 3, "_4": 5, "_6": 7, "_8": 9, "_10": 7 },
        "redirect",
        location,
        "status",
        302,
        "revalidate",
        false,
        "reload",
        true,
        "replace"
    ]);

    Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(LOCATION, location)
        .header("X-Remix-Reload-Document", "yes")
        .header("X-Remix-Response", "yes")
        .header(CONTENT_TYPE, "text/x-script")
        .body(Body::from(payload.to_string()))
}
