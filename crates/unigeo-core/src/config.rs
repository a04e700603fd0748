//! Configuration loading
//!
//! Configuration comes from, in order:
//! - Default values
//! - A YAML or JSON file (explicit path or the first default location found)
//! - `${ENV:NAME}` references inside that file, resolved after loading `.env`
//! - `RUST_LOG` / `UNIGEO_LOG_FORMAT` for logging

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::BatchConfig;
use crate::error::{Error, Result};
use crate::http::TransportConfig;
use crate::logging::LoggingConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP client settings
    pub transport: TransportConfig,

    /// Batch budgets and pacing shared by all providers
    pub batch: BatchConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Per-provider credentials and overrides, keyed by provider name
    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key for key-authenticated services
    pub api_key: Option<String>,

    /// Client id for client-credentials services
    pub client_id: Option<String>,

    /// Client secret for client-credentials services
    pub client_secret: Option<String>,

    /// Origin (scheme, host, port) that replaces the host of every provider endpoint
    pub base_url: Option<String>,

    /// Batch settings for this provider only
    pub batch: Option<BatchConfig>,
}

impl ProviderConfig {
    /// API key, or a configuration error naming the provider
    pub fn require_api_key(&self, provider: &str) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::config(format!("provider {} needs an api_key", provider)))
    }
}

fn env_reference_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{ENV:([^}]+)\}"))
        .as_ref()
        .map_err(|e| Error::Configuration {
            message: "invalid environment reference pattern".to_string(),
            source: Some(anyhow::Error::new(e.clone())),
        })
}

/// Replace every `${ENV:NAME}` with the variable's value.
///
/// A reference to an unset variable is an error.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let pattern = env_reference_pattern()?;
    let mut missing = Vec::new();

    let expanded = pattern.replace_all(input, |captures: &regex::Captures<'_>| {
        let name = captures[1].trim();
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::config(format!(
            "environment variable(s) not set: {}",
            missing.join(", ")
        )));
    }
    Ok(expanded.into_owned())
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("Failed to read config {}", path.display()),
            source: e,
        })?;
        let content = expand_env_vars(&content)?;

        let config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        config.validate()?;

        debug!(path = %path.display(), providers = config.providers.len(), "configuration loaded");
        Ok(config)
    }

    /// Load configuration from default locations, falling back to defaults
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        for path in Self::default_config_paths() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(mut config) => {
                        config.logging.merge_with_env();
                        return Ok(config);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to load config"),
                }
            }
        }

        let mut config = Self::default();
        config.logging.merge_with_env();
        Ok(config)
    }

    /// Load configuration from a specific file or default locations
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        match file {
            Some(path) => {
                dotenv::dotenv().ok();
                let mut config = Self::from_file(path)?;
                config.logging.merge_with_env();
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Default configuration file paths to check
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".unigeo.yaml"),
            PathBuf::from(".unigeo.json"),
            PathBuf::from("unigeo.yaml"),
            PathBuf::from("unigeo.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let unigeo_dir = config_dir.join("unigeo");
            paths.push(unigeo_dir.join("config.yaml"));
            paths.push(unigeo_dir.join("config.json"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".unigeo.yaml"));
            paths.push(home_dir.join(".unigeo.json"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.batch.validate()?;
        for provider in self.providers.values() {
            if let Some(batch) = &provider.batch {
                batch.validate()?;
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Batch settings for a provider, with its override applied
    pub fn batch_for(&self, name: &str) -> BatchConfig {
        self.provider(name)
            .and_then(|p| p.batch.clone())
            .unwrap_or_else(|| self.batch.clone())
    }
}
