//! Peer address of the current request.
//!
//! The development server reports the peer through `x-remote-*` headers;
//! [`bind_socket_info`] turns those into a [`ConnInfo`] extension. In
//! production the extractor falls back to axum's `ConnectInfo`.

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

pub const REMOTE_ADDRESS_HEADER: &str = "x-remote-address";
pub const REMOTE_PORT_HEADER: &str = "x-remote-port";
pub const REMOTE_FAMILY_HEADER: &str = "x-remote-family";

/// Remote end of the connection a request arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnInfo {
    pub address: Option<String>,
    pub port: Option<u16>,
    /// `IPv4` or `IPv6`.
    pub family: Option<String>,
}

impl ConnInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            address: text(REMOTE_ADDRESS_HEADER),
            port: text(REMOTE_PORT_HEADER)
                .and_then(|p| p.parse().ok())
                .filter(|p| *p != 0),
            family: text(REMOTE_FAMILY_HEADER),
        }
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            address: Some(addr.ip().to_string()),
            port: Some(addr.port()),
            family: Some(if addr.is_ipv4() { "IPv4" } else { "IPv6" }.to_string()),
        }
    }
}

/// Attach a [`ConnInfo`] built from the dev server's headers.
pub async fn bind_socket_info(mut request: Request, next: Next) -> Response {
    let info = ConnInfo::from_headers(request.headers());
    request.extensions_mut().insert(info);
    next.run(request).await
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ConnInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(info) = parts.extensions.get::<ConnInfo>() {
            return Ok(info.clone());
        }
        Ok(parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ConnInfo::from_addr(*addr))
            .unwrap_or_default())
    }
}
