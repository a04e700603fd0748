//! HTTP error classification and normalization
//!
//! Normalizes provider-specific error responses into a uniform error format

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::http::transport::TransportResponse;

/// Classification of HTTP failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// Client errors (4xx)
    ClientError,
    /// Server errors (5xx)
    ServerError,
    /// Connection, DNS or timeout failures before a response arrived
    NetworkError,
    /// 429 Too Many Requests
    RateLimitError,
    /// 401/403
    AuthenticationError,
    /// Anything else
    Unknown,
}

impl ErrorClassification {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorClassification::AuthenticationError,
            429 => ErrorClassification::RateLimitError,
            400..=499 => ErrorClassification::ClientError,
            500..=599 => ErrorClassification::ServerError,
            _ => ErrorClassification::Unknown,
        }
    }
}

/// Normalized HTTP error representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpError {
    /// HTTP status code if available
    pub status_code: Option<u16>,
    /// Error classification
    pub classification: ErrorClassification,
    /// Provider-specific error code
    pub provider_code: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Parsed JSON body, when there was one
    pub details: Option<Value>,
}

impl HttpError {
    /// Create from a transport response
    pub fn from_response(response: &TransportResponse) -> Self {
        let details = serde_json::from_str::<Value>(&response.body).ok();
        let (provider_code, message) = Self::extract_provider_error(&details, &response.body);

        Self {
            status_code: Some(response.status),
            classification: ErrorClassification::from_status(response.status),
            provider_code,
            message,
            details,
        }
    }

    /// Create from a reqwest failure that produced no response
    pub fn from_request_error(error: reqwest::Error) -> Self {
        let classification = if error.is_timeout() || error.is_connect() {
            ErrorClassification::NetworkError
        } else {
            ErrorClassification::Unknown
        };

        Self {
            status_code: error.status().map(|s| s.as_u16()),
            classification,
            provider_code: None,
            message: error.to_string(),
            details: None,
        }
    }

    /// Extract provider-specific error information.
    ///
    /// Geocoding services disagree on error envelopes; the shapes below cover
    /// the ones seen from the shipped providers, in order of specificity.
    pub fn extract_provider_error(details: &Option<Value>, body: &str) -> (Option<String>, String) {
        if let Some(json) = details {
            // {"error": {"code": ..., "description" | "message": ...}}
            if let Some(error) = json.get("error") {
                let code = error
                    .get("code")
                    .map(|c| match c {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                let message = error
                    .get("description")
                    .or_else(|| error.get("message"))
                    .and_then(|m| m.as_str())
                    .or_else(|| error.as_str())
                    .unwrap_or(body)
                    .to_string();
                return (code, message);
            }

            // {"type": "ApplicationError", "subtype": ..., "details": ...}
            if let Some(error_type) = json.get("type").and_then(|t| t.as_str()) {
                let code = json
                    .get("subtype")
                    .and_then(|s| s.as_str())
                    .unwrap_or(error_type)
                    .to_string();
                let message = json
                    .get("details")
                    .or_else(|| json.get("title"))
                    .and_then(|m| m.as_str())
                    .unwrap_or(body)
                    .to_string();
                return (Some(code), message);
            }

            // {"errorText": ...}
            if let Some(message) = json.get("errorText").and_then(|m| m.as_str()) {
                return (None, message.to_string());
            }

            if let Some(message) = json.get("message").and_then(|m| m.as_str()) {
                return (None, message.to_string());
            }
        }

        (None, body.to_string())
    }

    pub fn classification(&self) -> ErrorClassification {
        self.classification
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTP Error [{}]: {} (classification: {:?})",
            self.status_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            self.message,
            self.classification
        )
    }
}

impl std::error::Error for HttpError {}

impl From<HttpError> for crate::Error {
    fn from(http_error: HttpError) -> Self {
        crate::Error::Http {
            message: http_error.message.clone(),
            status_code: http_error.status_code,
            source: Some(anyhow::anyhow!("{}", http_error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ErrorClassification::from_status(401),
            ErrorClassification::AuthenticationError
        );
        assert_eq!(
            ErrorClassification::from_status(429),
            ErrorClassification::RateLimitError
        );
        assert_eq!(ErrorClassification::from_status(400), ErrorClassification::ClientError);
        assert_eq!(ErrorClassification::from_status(502), ErrorClassification::ServerError);
        assert_eq!(ErrorClassification::from_status(303), ErrorClassification::Unknown);
    }

    #[test]
    fn test_nested_error_description_extraction() {
        let json = serde_json::json!({
            "error": {
                "code": 403,
                "description": "Developer Inactive"
            }
        });

        let (code, message) = HttpError::extract_provider_error(&Some(json), "raw body");
        assert_eq!(code, Some("403".to_string()));
        assert_eq!(message, "Developer Inactive");
    }

    #[test]
    fn test_application_error_extraction() {
        let json = serde_json::json!({
            "type": "ApplicationError",
            "subtype": "InvalidCredentials",
            "details": "invalid credentials for apiKey"
        });

        let (code, message) = HttpError::extract_provider_error(&Some(json), "raw body");
        assert_eq!(code, Some("InvalidCredentials".to_string()));
        assert_eq!(message, "invalid credentials for apiKey");
    }

    #[test]
    fn test_plain_text_body_falls_back_to_raw() {
        let response = TransportResponse::new(500, "Internal Server Error");
        let error = HttpError::from_response(&response);
        assert_eq!(error.message, "Internal Server Error");
        assert_eq!(error.classification(), ErrorClassification::ServerError);
    }

    #[test]
    fn test_conversion_keeps_status() {
        let error = HttpError::from_response(&TransportResponse::new(404, "nope"));
        let converted: crate::Error = error.into();
        assert_eq!(converted.status_code(), Some(404));
    }
}
