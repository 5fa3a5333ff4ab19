//! Core configuration types and loading.

use crate::runtime::Runtime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted when no port is configured.
pub const PORT_ENV: &str = "PORT";

pub const DEFAULT_PORT: u16 = 3000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Gateway configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub static_files: StaticFilesConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Listening and runtime selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on. Falls back to `$PORT`, then 3000.
    pub port: Option<u16>,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub runtime: Runtime,
    /// Log every request.
    #[serde(default = "default_true")]
    pub default_logger: bool,
    /// Base URL of the rendering process requests are forwarded to.
    #[serde(default = "default_render_url")]
    pub render_url: String,
    /// Run the cleanup hook on SIGTERM/SIGINT (fast runtime).
    #[serde(default = "default_true")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            hostname: default_hostname(),
            runtime: Runtime::default(),
            default_logger: true,
            render_url: default_render_url(),
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// The port to listen on after applying `$PORT` and the default.
    pub fn port(&self) -> u16 {
        resolve_port(self.port, std::env::var(PORT_ENV).ok().as_deref())
    }
}

/// Configured port, then a parseable non-zero `$PORT`, then 3000.
pub fn resolve_port(configured: Option<u16>, env: Option<&str>) -> u16 {
    configured
        .or_else(|| env.and_then(|v| v.trim().parse().ok()).filter(|p| *p != 0))
        .unwrap_or(DEFAULT_PORT)
}

/// Where the build artifact lives.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_directory")]
    pub directory: PathBuf,
    /// Server build manifest, relative to `{directory}/server`.
    #[serde(default = "default_server_build_file")]
    pub server_build_file: String,
    /// Client asset directory name under `{directory}/client`.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    /// Hand-authored public files served outside production.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// URL prefix the rendered app is mounted under.
    #[serde(default = "default_basename")]
    pub basename: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            directory: default_build_directory(),
            server_build_file: default_server_build_file(),
            assets_dir: default_assets_dir(),
            public_dir: default_public_dir(),
            basename: default_basename(),
        }
    }
}

impl BuildConfig {
    pub fn client_directory(&self) -> PathBuf {
        self.directory.join("client")
    }

    pub fn server_build_path(&self) -> PathBuf {
        self.directory.join("server").join(&self.server_build_file)
    }
}

/// Static file serving and cache lifetimes (seconds).
#[derive(Debug, Clone, Deserialize)]
pub struct StaticFilesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_assets_max_age")]
    pub assets_max_age: u64,
    #[serde(default = "default_public_max_age")]
    pub public_max_age: u64,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assets_max_age: default_assets_max_age(),
            public_max_age: default_public_max_age(),
        }
    }
}

/// Development server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DevConfig {
    /// Path the hot-reload channel accepts upgrades on.
    #[serde(default = "default_hmr_path")]
    pub hmr_path: String,
    /// Application source directory; its contents are never served.
    #[serde(default = "default_app_directory")]
    pub app_directory: String,
    /// Extra glob patterns not served by the dev server.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Extra regular expressions not served by the dev server, matched
    /// against path and query.
    #[serde(default)]
    pub exclude_regex: Vec<String>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            hmr_path: default_hmr_path(),
            app_directory: default_app_directory(),
            exclude: Vec::new(),
            exclude_regex: Vec::new(),
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

pub(super) fn default_true() -> bool {
    true
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_render_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_build_directory() -> PathBuf {
    PathBuf::from("build")
}

fn default_server_build_file() -> String {
    "index.json".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_basename() -> String {
    "/".to_string()
}

fn default_assets_max_age() -> u64 {
    60 * 60 * 24 * 365
}

fn default_public_max_age() -> u64 {
    60 * 60
}

fn default_hmr_path() -> String {
    "/".to_string()
}

fn default_app_directory() -> String {
    "app".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.hostname, "0.0.0.0");
        assert_eq!(config.server.runtime, Runtime::Process);
        assert!(config.server.default_logger);
        assert_eq!(config.build.assets_dir, "assets");
        assert_eq!(config.static_files.assets_max_age, 31_536_000);
        assert_eq!(config.static_files.public_max_age, 3600);
        assert_eq!(config.dev.app_directory, "app");
    }

    #[test]
    fn build_paths() {
        let config: Config = toml::from_str(
            r#"
[build]
directory = "dist"
server_build_file = "manifest.json"
"#,
        )
        .unwrap();
        assert_eq!(config.build.client_directory(), PathBuf::from("dist/client"));
        assert_eq!(
            config.build.server_build_path(),
            PathBuf::from("dist/server/manifest.json")
        );
    }

    #[test]
    fn port_resolution_order() {
        assert_eq!(resolve_port(Some(8080), Some("9000")), 8080);
        assert_eq!(resolve_port(None, Some("9000")), 9000);
        assert_eq!(resolve_port(None, Some("nope")), DEFAULT_PORT);
        assert_eq!(resolve_port(None, Some("0")), DEFAULT_PORT);
        assert_eq!(resolve_port(None, None), DEFAULT_PORT);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[server]\nport = 4321\nruntime = \"edge\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, Some(4321));
        assert_eq!(config.server.runtime, Runtime::Edge);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }
}
