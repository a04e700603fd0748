//! reqwest-backed transport
//!
//! Provides the production [`Transport`] implementation. Redirects are never
//! followed automatically: batch protocols read `303`/`202` responses and
//! their `Location` headers themselves.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::transport::{Params, PostBody, Transport, TransportResponse};
use crate::logging::redaction::redact_url;
use crate::Result;

/// Configuration for the HTTP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Total request timeout in seconds
    pub timeout_secs: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("unigeo/{}", crate::VERSION),
        }
    }
}

impl TransportConfig {
    /// Validate timeout settings
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("transport timeout_secs must be greater than zero"));
        }
        if self.connect_timeout_secs > self.timeout_secs {
            return Err(crate::Error::config(
                "transport connect_timeout_secs cannot exceed timeout_secs",
            ));
        }
        Ok(())
    }
}

/// Transport built on a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Create a new transport from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        config.validate()?;

        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::Error::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e.into()),
            })?;

        Ok(Self { client })
    }

    /// Create with default configuration
    pub fn with_default_config() -> Result<Self> {
        Self::new(&TransportConfig::default())
    }

    async fn execute(&self, request: RequestBuilder) -> Result<TransportResponse> {
        let response = request.send().await?;
        Self::read_response(response).await
    }

    async fn read_response(response: Response) -> Result<TransportResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, params: &Params) -> Result<TransportResponse> {
        debug!(url = %redact_url(url), params = params.len(), "GET");
        self.execute(self.client.get(url).query(params)).await
    }

    async fn post(&self, url: &str, params: &Params, body: PostBody) -> Result<TransportResponse> {
        debug!(url = %redact_url(url), params = params.len(), "POST");
        let request = self.client.post(url).query(params);
        let request = match body {
            PostBody::Json(value) => request.json(&value),
            PostBody::Text { content_type, body } => request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body),
            PostBody::Form(fields) => request.form(&fields),
            PostBody::Empty => request,
        };
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.user_agent.starts_with("unigeo/"));
    }

    #[test]
    fn test_config_validation() {
        let zero = TransportConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = TransportConfig {
            timeout_secs: 5,
            connect_timeout_secs: 10,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_transport_creation() {
        assert!(ReqwestTransport::with_default_config().is_ok());
    }
}
