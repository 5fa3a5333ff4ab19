//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.runtime '{0}' is not one of: process, fast, edge")]
    UnknownRuntime(String),
    #[error("server.render_url is not a valid URL: {0}")]
    InvalidRenderUrl(String),
    #[error("server.hostname is required")]
    MissingHostname,
    #[error("build.assets_dir must be a single non-empty path segment, got '{0}'")]
    InvalidAssetsDir(String),
    #[error("build.basename must start with '/', got '{0}'")]
    InvalidBasename(String),
    #[error("dev.hmr_path must start with '/', got '{0}'")]
    InvalidHmrPath(String),
    #[error("dev.exclude contains an invalid glob '{0}'")]
    InvalidExcludeGlob(String),
    #[error("dev.exclude_regex contains an invalid regex '{0}'")]
    InvalidExcludeRegex(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.server.runtime.is_supported() {
        errors.push(ValidationError::UnknownRuntime(
            config.server.runtime.to_string(),
        ));
    }
    if reqwest::Url::parse(&config.server.render_url).is_err() {
        errors.push(ValidationError::InvalidRenderUrl(
            config.server.render_url.clone(),
        ));
    }
    if config.server.hostname.trim().is_empty() {
        errors.push(ValidationError::MissingHostname);
    }

    let assets_dir = &config.build.assets_dir;
    if assets_dir.is_empty() || assets_dir.contains('/') || assets_dir == ".." {
        errors.push(ValidationError::InvalidAssetsDir(assets_dir.clone()));
    }

    if !config.build.basename.starts_with('/') {
        errors.push(ValidationError::InvalidBasename(config.build.basename.clone()));
    }

    if !config.dev.hmr_path.starts_with('/') {
        errors.push(ValidationError::InvalidHmrPath(config.dev.hmr_path.clone()));
    }
    for pattern in &config.dev.exclude {
        if glob::Pattern::new(pattern).is_err() {
            errors.push(ValidationError::InvalidExcludeGlob(pattern.clone()));
        }
    }
    for pattern in &config.dev.exclude_regex {
        if regex::Regex::new(pattern).is_err() {
            errors.push(ValidationError::InvalidExcludeRegex(pattern.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        let config: Config = toml::from_str("").unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_runtime_fails() {
        let config: Config = toml::from_str("[server]\nruntime = \"lambda\"\n").unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::UnknownRuntime(r) if r == "lambda"))
        );
    }

    #[test]
    fn test_reports_every_error() {
        let toml = r#"
[server]
render_url = "not a url"

[build]
assets_dir = "a/b"

[dev]
hmr_path = "hmr"
exclude = ["[unclosed"]
exclude_regex = ["(unclosed"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
    }
}
