//! Telemetry utilities for request timing and span construction.

use std::time::{Duration, Instant};

/// Guard measuring how long a request took.
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Human-readable elapsed time: milliseconds below one second, seconds above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}s", ms / 1000)
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one HTTP request.
    pub fn request(method: &http::Method, path: &str) -> Span {
        info_span!("request", method = %method, path = %path)
    }

    /// Span for one upgraded connection.
    pub fn upgrade(path: &str, protocol: Option<&str>) -> Span {
        if let Some(protocol) = protocol {
            info_span!("upgrade", path = %path, protocol = %protocol)
        } else {
            info_span!("upgrade", path = %path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_switches_to_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(12)), "12ms");
        assert_eq!(format_elapsed(Duration::from_millis(999)), "999ms");
        assert_eq!(format_elapsed(Duration::from_millis(2500)), "2s");
    }
}
