//! Logging setup for applications embedding unigeo
//!
//! The library itself only emits `tracing` events. Binaries and tests call
//! [`init_logging`] to install a subscriber in one of three formats.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, e.g. `info` or `unigeo_core=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Colored output
    pub ansi: bool,
    /// Include thread IDs
    pub thread_ids: bool,
    /// Include file and line numbers
    pub source_location: bool,
    /// Per-module level overrides
    pub module_filter: Option<HashMap<String, String>>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line output
    Compact,
    /// Multi-field human-readable output
    Full,
    /// One JSON object per event
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            ansi: true,
            thread_ids: false,
            source_location: false,
            module_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Apply `RUST_LOG` and `UNIGEO_LOG_FORMAT` overrides
    pub fn merge_with_env(&mut self) {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            self.level = rust_log;
        }

        if let Ok(format) = std::env::var("UNIGEO_LOG_FORMAT") {
            match format.parse() {
                Ok(parsed) => self.format = parsed,
                Err(_) => tracing::warn!("Invalid log format: {}, using default", format),
            }
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| Error::config(format!("Invalid log level {:?}: {}", self.level, e)))?;

        if let Some(module_filters) = &self.module_filter {
            for (module, level) in module_filters {
                let directive = format!("{}={}", module, level)
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid filter directive: {}", e)))?;
                filter = filter.add_directive(directive);
            }
        }

        Ok(filter)
    }
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!("unknown log format: {}", other))),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let env_filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            builder.with_ansi(config.ansi).compact().finish(),
        ),
        LogFormat::Full => {
            tracing::subscriber::set_global_default(builder.with_ansi(config.ansi).finish())
        }
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())
        }
    };
    installed.map_err(|e| Error::config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(config = ?config, "Logging system initialized");
    Ok(())
}

/// Sensitive data redaction for log output
pub mod redaction {
    use regex::Regex;
    use std::sync::OnceLock;
    use url::Url;

    const REDACTED: &str = "***";

    static SECRET_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

    fn secret_pattern() -> Option<&'static Regex> {
        SECRET_REGEX
            .get_or_init(|| {
                Regex::new(
                    r#"(?i)(api[_-]?key|apikey|key|token|access_token|client_secret|secret|password)([=:]\s*)['"]?([^\s&'"]+)['"]?"#,
                )
                .ok()
            })
            .as_ref()
    }

    /// Whether a parameter or field name carries a credential
    pub fn is_sensitive_key(key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        key.contains("key")
            || key.contains("token")
            || key.contains("secret")
            || key.contains("password")
            || key.contains("credential")
    }

    /// Redact `name=value` style secrets in free text
    pub fn redact_sensitive(input: &str) -> String {
        match secret_pattern() {
            Some(regex) => regex
                .replace_all(input, format!("${{1}}${{2}}{}", REDACTED).as_str())
                .into_owned(),
            None => input.to_string(),
        }
    }

    /// Redact credential query parameters in a URL
    pub fn redact_url(input: &str) -> String {
        let mut url = match Url::parse(input) {
            Ok(url) => url,
            Err(_) => return redact_sensitive(input),
        };
        if url.query().is_none() {
            return input.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let value = if is_sensitive_key(&k) {
                    REDACTED.to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let input = "apiKey=abc123 client_secret: s3cr3t token=xyz";
        let redacted = redaction::redact_sensitive(input);
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("s3cr3t"));
        assert!(!redacted.contains("xyz"));
        assert!(redacted.contains("apiKey=***"));
    }

    #[test]
    fn test_url_redaction_keeps_other_params() {
        let redacted =
            redaction::redact_url("https://api.example.test/geocode?q=Berlin&key=abc123&limit=5");
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("q=Berlin"));
        assert!(redacted.contains("limit=5"));
        assert!(redacted.contains("key=***") || redacted.contains("key=%2A%2A%2A"));
    }

    #[test]
    fn test_url_without_query_is_unchanged() {
        let url = "https://api.example.test/search/2/batch/1";
        assert_eq!(redaction::redact_url(url), url);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
