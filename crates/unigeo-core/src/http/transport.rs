//! Transport seam between providers and the network
//!
//! Providers and batch engines never talk to reqwest directly. They go
//! through [`Transport`], which returns every response, whatever its status,
//! so that protocols driven by 202/303/429 codes can inspect them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::http::error::HttpError;
use crate::Result;

/// Query-string parameters, in the order they are sent
pub type Params = Vec<(String, String)>;

/// Build a parameter list from borrowed pairs
pub fn params<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Params
where
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Body of a POST request
#[derive(Debug, Clone, PartialEq)]
pub enum PostBody {
    /// JSON document, sent as `application/json`
    Json(Value),
    /// Raw text with an explicit content type
    Text { content_type: String, body: String },
    /// URL-encoded form fields
    Form(Params),
    /// No body
    Empty,
}

impl PostBody {
    pub fn text(content_type: impl Into<String>, body: impl Into<String>) -> Self {
        PostBody::Text {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// A fully read HTTP response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, keys lowercased
    pub headers: HashMap<String, String>,
    /// Body text
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// JSON response with the matching content type
    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).with_header("Content-Type", "application/json")
    }

    /// Add a header (the name is stored lowercased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the server declared a JSON body
    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| crate::Error::Http {
            message: format!("Failed to parse response as JSON: {}", e),
            status_code: Some(self.status),
            source: Some(e.into()),
        })
    }

    /// Turn a non-2xx response into a transport error
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpError::from_response(&self).into())
        }
    }
}

/// HTTP transport used by providers and batch engines.
///
/// Implementations must return non-2xx responses as `Ok` values and only
/// fail for requests that never produced a response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a GET request
    async fn get(&self, url: &str, params: &Params) -> Result<TransportResponse>;

    /// Perform a POST request
    async fn post(&self, url: &str, params: &Params, body: PostBody) -> Result<TransportResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = TransportResponse::new(303, "").with_header("Location", "/batch/1");
        assert_eq!(response.header("location"), Some("/batch/1"));
        assert_eq!(response.header("LOCATION"), Some("/batch/1"));
        assert_eq!(response.header("retry-after"), None);
    }

    #[test]
    fn test_json_content_type_detection() {
        let response = TransportResponse::json_body(400, &json!({"error": {}}));
        assert!(response.is_json());
        assert!(!TransportResponse::new(400, "oops").is_json());
    }

    #[test]
    fn test_error_for_status_keeps_status_code() {
        let err = TransportResponse::new(503, "down").error_for_status().unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert!(TransportResponse::new(204, "").error_for_status().is_ok());
    }

    #[test]
    fn test_params_builder_preserves_order() {
        let built = params([("action", "run"), ("outdelim", "|")]);
        assert_eq!(built[0], ("action".to_string(), "run".to_string()));
        assert_eq!(built[1].0, "outdelim");
    }
}
