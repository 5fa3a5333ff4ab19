//! Unified error handling for ssr-gateway.
//!
//! Each concern gets its own enum so callers can match on what went wrong:
//! listener manipulation on the upgrade event source, socket upgrades,
//! build loading, rendering, and the adapters that tie them together.

use crate::upgrade::ListenerId;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used at the seams with user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// Listener Errors (upgrade event source)
// ============================================================================

/// Errors raised while manipulating upgrade listeners.
///
/// The development arbiter never catches these: a broken upgrade chain has
/// to surface at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("no upgrade listener with id {0}")]
    NotFound(ListenerId),

    /// A second listener tried to take a connection that was already taken.
    #[error("connection already upgraded")]
    AlreadyUpgraded,

    #[error("arbiter step `{step}` is not allowed in state {state}")]
    OutOfOrder {
        step: &'static str,
        state: &'static str,
    },
}

impl ListenerError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "listener_not_found",
            Self::AlreadyUpgraded => "already_upgraded",
            Self::OutOfOrder { .. } => "out_of_order",
        }
    }
}

// ============================================================================
// Upgrade Errors (socket handshake)
// ============================================================================

/// Errors raised while turning a claimed connection into a WebSocket.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The upgrade event carried no underlying connection.
    #[error("upgrade socket has no underlying connection")]
    Detached,

    #[error("missing sec-websocket-key header")]
    MissingKey,

    #[error("connection upgrade failed: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid handshake response: {0}")]
    Http(#[from] http::Error),
}

// ============================================================================
// Build Errors
// ============================================================================

/// Errors raised while loading the server build artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read server build {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse server build {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Render Errors (request delegation)
// ============================================================================

/// Errors raised while delegating a request to the rendering handler.
///
/// Nothing here is translated: the user's error hook sees the error as-is,
/// and without a hook the response is a plain 500.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("load context failed: {0}")]
    Context(#[source] BoxError),

    #[error("request handler failed: {0}")]
    Handler(#[source] BoxError),
}

impl RenderError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Context(_) => "load_context",
            Self::Handler(_) => "handler",
        }
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        tracing::error!(code = self.error_code(), error = %self, "Unhandled render error");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

// ============================================================================
// Dev Server Errors
// ============================================================================

/// Errors raised while setting up the development server.
#[derive(Debug, Error)]
pub enum DevError {
    #[error("invalid exclude glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid exclude regex: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

// ============================================================================
// Adapter Errors (runtime entry points)
// ============================================================================

/// Errors raised by the runtime entry points while starting up.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Dev(#[from] DevError),

    /// The user's graceful-shutdown callback failed.
    #[error("shutdown cleanup failed: {0}")]
    Cleanup(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_error_codes() {
        assert_eq!(ListenerError::AlreadyUpgraded.error_code(), "already_upgraded");
        let err = ListenerError::OutOfOrder {
            step: "patch",
            state: "Idle",
        };
        assert_eq!(err.error_code(), "out_of_order");
        assert_eq!(
            err.to_string(),
            "arbiter step `patch` is not allowed in state Idle"
        );
    }

    #[test]
    fn test_render_error_is_500() {
        let err = RenderError::Handler("boom".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_build_error_mentions_path() {
        let err = BuildError::Io {
            path: PathBuf::from("build/server/manifest.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("build/server/manifest.json"));
    }
}
