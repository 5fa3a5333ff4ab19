//! Configuration loading and management.
//!
//! - [`types`]: config struct definitions and defaults
//! - [`validation`]: startup checks that report every problem at once

mod types;
pub mod validation;

pub use types::{
    BuildConfig, Config, ConfigError, DEFAULT_PORT, DevConfig, PORT_ENV, ServerConfig,
    StaticFilesConfig, resolve_port,
};
pub use validation::{ValidationError, validate};
