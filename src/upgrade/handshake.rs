//! WebSocket handshake helpers shared by every upgrade path.

use super::listeners::UpgradeRequest;
use super::socket::{HandlerFactory, UpgradeSocket, run_socket};
use crate::error::{ListenerError, UpgradeError};
use crate::telemetry::spans;
use axum::body::Body;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tracing::{Instrument, debug, warn};

/// `true` for `Connection: upgrade` + `Upgrade: websocket` requests.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// The raw `sec-websocket-protocol` header, compared verbatim by the dev
/// arbiter.
pub fn offered_protocols(headers: &HeaderMap) -> Option<&str> {
    headers.get(SEC_WEBSOCKET_PROTOCOL).and_then(|v| v.to_str().ok())
}

/// First sub-protocol the client offered, echoed back on accept.
pub fn first_offered_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    offered_protocols(headers)?
        .split(',')
        .map(str::trim)
        .find(|p| !p.is_empty())
        .and_then(|p| HeaderValue::from_str(p).ok())
}

/// Copy the head of a request into an [`UpgradeRequest`].
pub fn head_of<B>(request: &Request<B>) -> UpgradeRequest {
    let mut head = Request::new(());
    *head.method_mut() = request.method().clone();
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();
    head
}

/// Build the `101 Switching Protocols` response for a claimed connection.
pub fn switching_protocols(
    headers: &HeaderMap,
    protocol: Option<&HeaderValue>,
) -> Result<Response<Body>, UpgradeError> {
    let key = headers
        .get(SEC_WEBSOCKET_KEY)
        .ok_or(UpgradeError::MissingKey)?;

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()));
    if let Some(protocol) = protocol {
        builder = builder.header(SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    Ok(builder.body(Body::empty())?)
}

pub fn bad_request(reason: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(reason.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Claim `socket` and run a handler built by `factory` once the handshake
/// completes.
pub fn accept(
    socket: &UpgradeSocket,
    request: &UpgradeRequest,
    factory: &HandlerFactory,
) -> Result<(), ListenerError> {
    let selected = first_offered_protocol(request.headers());
    let pending = socket.claim(selected.clone())?;
    let handler = factory(request);

    if pending.is_detached() {
        debug!(path = %request.uri().path(), "claimed detached upgrade socket");
        return Ok(());
    }

    let path = request.uri().path().to_string();
    let protocol = selected.and_then(|p| p.to_str().ok().map(str::to_string));
    let span = spans::upgrade(&path, protocol.as_deref());

    tokio::spawn(
        async move {
            match pending.into_websocket().await {
                Ok(stream) => run_socket(stream, handler, path, protocol).await,
                Err(e) => warn!(error = %e, "websocket handshake did not complete"),
            }
        }
        .instrument(span),
    );
    Ok(())
}
