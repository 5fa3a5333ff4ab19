//! Deployment runtime identifiers.

use serde::Deserialize;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// The runtime an application is deployed to.
///
/// Unknown identifiers are kept verbatim rather than rejected; upgrade
/// support degrades to a no-op for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum Runtime {
    /// Traditional process-based server with an upgrade event source.
    #[default]
    Process,
    /// Single-binary runtime launched from a server descriptor.
    Fast,
    /// Edge/isolate runtime with in-request upgrades.
    Edge,
    /// Anything else.
    Other(String),
}

impl Runtime {
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "process" => Runtime::Process,
            "fast" => Runtime::Fast,
            "edge" => Runtime::Edge,
            _ => Runtime::Other(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Runtime::Process => "process",
            Runtime::Fast => "fast",
            Runtime::Edge => "edge",
            Runtime::Other(id) => id,
        }
    }

    #[inline]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Runtime::Other(_))
    }
}

impl From<String> for Runtime {
    fn from(id: String) -> Self {
        Runtime::parse(&id)
    }
}

impl FromStr for Runtime {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Runtime::parse(s))
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
