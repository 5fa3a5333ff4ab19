//! Environment-derived run mode.
//!
//! The mode picks where static files come from and how long they may be
//! cached, and whether the build artifact is cached or reloaded per request.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable holding the run mode.
pub const MODE_ENV: &str = "APP_ENV";

/// Tri-state run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
    Test,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::Test => "test",
        }
    }

    #[inline]
    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    #[inline]
    pub fn is_development(self) -> bool {
        self == Mode::Development
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("APP_ENV is not set or is not valid: {0:?}. Please set it to one of the following: test, development, production")]
    Invalid(Option<String>),
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Mode::Development),
            "production" => Ok(Mode::Production),
            "test" => Ok(Mode::Test),
            _ => Err(ModeError::Invalid(Some(s.to_string()))),
        }
    }
}

/// Strictly resolve the mode from `APP_ENV`.
///
/// Fails when the variable is unset or holds anything but the three modes.
pub fn get_mode() -> Result<Mode, ModeError> {
    mode_from(std::env::var(MODE_ENV).ok().as_deref())
}

/// Strict resolution from an already-read value.
pub fn mode_from(value: Option<&str>) -> Result<Mode, ModeError> {
    match value {
        Some(v) => v.parse(),
        None => Err(ModeError::Invalid(None)),
    }
}

/// Resolve the build mode: `development` when `APP_ENV=development`,
/// `production` for everything else.
pub fn get_build_mode() -> Mode {
    build_mode_from(std::env::var(MODE_ENV).ok().as_deref())
}

pub fn build_mode_from(value: Option<&str>) -> Mode {
    match value {
        Some("development") => Mode::Development,
        _ => Mode::Production,
    }
}
