//! Configuration validation utilities.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IoError(_) => "config_io_error",
            Self::ParseError(_) => "config_parse_error",
            Self::ValidationError(_) => "config_invalid",
        }
    }
}

/// Parse duration string using humantime.
///
/// Supports various formats: `30s`, `1m`, `5m30s`, `1h`, `2h30m`, `1d`, `100ms`, etc.
///
/// # Examples
///
/// ```
/// use podscope::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn env_var_regex() -> Option<&'static Regex> {
    static ENV_VAR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
        .as_ref()
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax; unset variables without a
/// default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    let Some(regex) = env_var_regex() else {
        return input.to_string();
    };

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Expand an optional credential; an empty expansion means "not set".
pub(crate) fn expand_optional(value: &mut Option<String>) {
    if let Some(raw) = value.take() {
        let expanded = expand_env_vars(&raw);
        let trimmed = expanded.trim();
        if !trimmed.is_empty() {
            *value = Some(trimmed.to_string());
        }
    }
}

/// Require `value` to be an absolute http(s) URL.
pub(crate) fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{field}: invalid URL '{value}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::ValidationError(format!(
            "{field}: unsupported URL scheme '{other}' (expected http or https)"
        ))),
    }
}
