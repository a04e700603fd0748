//! Error types for the unigeo core library
//!
//! This module defines the error taxonomy shared by the adapter contract,
//! the batch engines and the transport seam. It uses thiserror for the
//! public enum and anyhow for ad-hoc internal context.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for unigeo operations
#[derive(Error, Debug)]
pub enum Error {
    /// The provider does not accept this kind of query
    #[error("{provider} does not support {kind} geocoding")]
    Capability {
        provider: String,
        kind: QueryKind,
    },

    /// The provider does not implement the requested operation
    #[error("Unsupported operation: {message}")]
    Unsupported {
        message: String,
        feature: Option<String>,
    },

    /// Non-2xx or unreadable response from the transport
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        status_code: Option<u16>,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The remote service answered with a shape that breaks its contract
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        message: String,
    },

    /// An attempt or hop budget ran out before the remote job finished
    #[error("Timeout: {message} (after {attempts} attempts)")]
    Timeout {
        message: String,
        attempts: u32,
    },

    /// The remote service refused the request with its rate-limit status
    #[error("Rate limited by provider: {message}")]
    RateLimit {
        message: String,
    },

    /// The caller tripped the cancellation token
    #[error("Batch job cancelled: {message}")]
    Cancelled {
        message: String,
    },

    /// Credential exchange failures
    #[error("Authentication failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    /// Application-level error reported by the provider
    #[error("Provider error: {provider} - {message}")]
    Provider {
        provider: String,
        message: String,
    },

    /// JSON parsing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Validation errors for inputs
    #[error("Validation error: {field} - {message}")]
    Validation {
        field: String,
        message: String,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic internal error with context
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of a geocoding query, used for capability gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Ipv4,
    Ipv6,
    Address,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Ipv4 => write!(f, "IPv4"),
            QueryKind::Ipv6 => write!(f, "IPv6"),
            QueryKind::Address => write!(f, "address"),
        }
    }
}

impl Error {
    /// Build a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Build a configuration error without a source
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Status code carried by transport errors, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

// Conversion implementations
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration {
            message: format!("Invalid YAML: {}", err),
            source: Some(err.into()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        crate::http::HttpError::from_request_error(err).into()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal {
            message: err.to_string(),
            source: err,
        }
    }
}
