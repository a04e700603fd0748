//! Shared single-item search plumbing
//!
//! Every provider embeds an [`AddressSearch`]: it owns the transport handle,
//! the forward and reverse endpoints and the authentication parameters, and
//! leaves payload mapping to the provider.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use unigeo_core::http::{Params, Transport};
use unigeo_core::{Error, Result};

/// Endpoints and credentials for one provider's search API
#[derive(Clone)]
pub struct AddressSearch {
    provider: &'static str,
    transport: Arc<dyn Transport>,
    forward_url: String,
    reverse_url: String,
    auth: Params,
}

impl std::fmt::Debug for AddressSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSearch")
            .field("provider", &self.provider)
            .field("forward_url", &self.forward_url)
            .field("reverse_url", &self.reverse_url)
            .finish()
    }
}

impl AddressSearch {
    pub fn new(
        provider: &'static str,
        transport: Arc<dyn Transport>,
        forward_url: impl Into<String>,
        reverse_url: impl Into<String>,
        auth: Params,
    ) -> Self {
        Self {
            provider,
            transport,
            forward_url: forward_url.into(),
            reverse_url: reverse_url.into(),
            auth,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn auth(&self) -> &Params {
        &self.auth
    }

    pub fn forward_url(&self) -> &str {
        &self.forward_url
    }

    pub fn reverse_url(&self) -> &str {
        &self.reverse_url
    }

    /// GET a JSON document with the auth parameters appended
    pub async fn fetch(&self, url: &str, params: Params) -> Result<Value> {
        let mut all = params;
        all.extend(self.auth.iter().cloned());
        debug!(provider = self.provider, "search request");

        let response = self.transport.get(url, &all).await?.error_for_status()?;
        response.json().map_err(|e| match e {
            Error::Http { message, .. } => Error::Provider {
                provider: self.provider.to_string(),
                message,
            },
            other => other,
        })
    }
}

/// Move an endpoint under another origin, keeping its path.
///
/// `rebase("http://localhost:9000", "https://api.example.com/v1/geocode")`
/// gives `http://localhost:9000/v1/geocode`.
pub fn rebase(origin: &str, endpoint: &str) -> Result<String> {
    let endpoint = url::Url::parse(endpoint)
        .map_err(|e| Error::config(format!("invalid endpoint {}: {}", endpoint, e)))?;
    url::Url::parse(origin)
        .map_err(|e| Error::config(format!("invalid base_url {}: {}", origin, e)))?;
    Ok(format!("{}{}", origin.trim_end_matches('/'), endpoint.path()))
}

/// Percent-encode text for use inside a URL path segment
pub fn encode_path_segment(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// String field of a JSON object, skipping empty strings
pub(crate) fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field that some services send as a string
pub(crate) fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
