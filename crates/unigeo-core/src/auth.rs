//! Credential handling for token-authenticated providers
//!
//! Some providers exchange a long-lived client id/secret pair for a
//! short-lived bearer token before any geocoding call. [`CredentialCache`]
//! keeps the current token and [`ClientCredentials`] refreshes it through
//! the transport when it has expired.

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http::{params, PostBody, Transport};
use crate::Result;

/// Tokens are treated as expired this long before the provider says so
pub const TOKEN_SAFETY_MARGIN_MS: i64 = 30_000;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Token request rejected: {0}")]
    Rejected(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

/// Current time in epoch milliseconds
pub fn now_epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A bearer token and the instant after which it must not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub expires_at_epoch_millis: i64,
}

impl CachedToken {
    pub fn is_valid_at(&self, now_epoch_millis: i64) -> bool {
        now_epoch_millis <= self.expires_at_epoch_millis
    }
}

/// Single-slot bearer token cache
#[derive(Debug, Clone, Default)]
pub struct CredentialCache {
    token: Option<CachedToken>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if it has not expired
    pub fn get(&self) -> Option<&str> {
        self.get_at(now_epoch_millis())
    }

    /// The cached token as seen at `now_epoch_millis`
    pub fn get_at(&self, now_epoch_millis: i64) -> Option<&str> {
        self.token
            .as_ref()
            .filter(|token| token.is_valid_at(now_epoch_millis))
            .map(|token| token.value.as_str())
    }

    /// Store a token, shortening the provider-declared expiry by the safety margin
    pub fn put(&mut self, token: impl Into<String>, remote_expiry_epoch_millis: i64) {
        let expires_at_epoch_millis =
            remote_expiry_epoch_millis.saturating_sub(TOKEN_SAFETY_MARGIN_MS);
        self.token = Some(CachedToken {
            value: token.into(),
            expires_at_epoch_millis,
        });
    }

    /// Raw cached entry, expired or not
    pub fn entry(&self) -> Option<&CachedToken> {
        self.token.as_ref()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    /// Lifetime in seconds
    expires_in: Option<i64>,
    error: Option<serde_json::Value>,
}

/// Epoch millis at which a token issued at `now` with `expires_in` seconds expires
fn remote_expiry(now_epoch_millis: i64, expires_in: i64) -> Result<i64> {
    if expires_in < 0 {
        let message = format!("negative expires_in: {}", expires_in);
        return Err(AuthError::InvalidResponse(message).into());
    }
    let expires_at = expires_in
        .checked_mul(1000)
        .and_then(|ms| now_epoch_millis.checked_add(ms))
        .ok_or_else(|| {
            AuthError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
        })?;
    Ok(expires_at)
}

/// OAuth2 client-credentials token source backed by a [`CredentialCache`]
#[derive(Debug)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
    token_endpoint: String,
    cache: Mutex<CredentialCache>,
}

impl ClientCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.is_empty() {
            return Err(AuthError::MissingCredential("client_id".to_string()).into());
        }
        if client_secret.is_empty() {
            return Err(AuthError::MissingCredential("client_secret".to_string()).into());
        }

        Ok(Self {
            client_id,
            client_secret,
            token_endpoint: token_endpoint.into(),
            cache: Mutex::new(CredentialCache::new()),
        })
    }

    /// Return a valid bearer token, exchanging credentials on a cache miss.
    ///
    /// The cache lock is held across the exchange, so concurrent callers
    /// wait for a single refresh instead of issuing one each.
    pub async fn token(&self, transport: &dyn Transport) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get() {
            debug!("using cached bearer token");
            return Ok(token.to_string());
        }

        info!(endpoint = %self.token_endpoint, "requesting bearer token");
        let form = params([
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("f", "json"),
        ]);
        let response = transport
            .post(&self.token_endpoint, &Vec::new(), PostBody::Form(form))
            .await?
            .error_for_status()?;
        let parsed: TokenResponse = response.json()?;

        if let Some(error) = parsed.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(AuthError::Rejected(message).into());
        }

        let access_token = parsed
            .access_token
            .ok_or_else(|| AuthError::InvalidResponse("missing access_token".to_string()))?;
        let expires_in = parsed
            .expires_in
            .ok_or_else(|| AuthError::InvalidResponse("missing expires_in".to_string()))?;

        let expires_at = remote_expiry(now_epoch_millis(), expires_in)?;
        cache.put(access_token.clone(), expires_at);
        Ok(access_token)
    }

    /// Snapshot of the cache, mostly for diagnostics
    pub async fn cached(&self) -> Option<CachedToken> {
        self.cache.lock().await.entry().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ScriptedTransport, TransportResponse};
    use serde_json::json;

    #[test]
    fn test_token_valid_until_margin() {
        let now = 1_700_000_000_000;
        let mut cache = CredentialCache::new();
        cache.put("tok", now + 60_000);

        assert_eq!(cache.get_at(now), Some("tok"));
        assert_eq!(cache.get_at(now + 29_000), Some("tok"));
        assert_eq!(cache.get_at(now + 30_000), Some("tok"));
        assert_eq!(cache.get_at(now + 31_000), None);
    }

    #[test]
    fn test_empty_cache_returns_none() {
        let cache = CredentialCache::new();
        assert!(cache.get().is_none());
        assert!(cache.entry().is_none());
    }

    #[test]
    fn test_put_replaces_previous_token() {
        let now = now_epoch_millis();
        let mut cache = CredentialCache::new();
        cache.put("old", now + 3_600_000);
        cache.put("new", now + 3_600_000);
        assert_eq!(cache.get(), Some("new"));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = ClientCredentials::new("", "secret", "https://auth").unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[tokio::test]
    async fn test_token_exchange_is_cached() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/oauth2/token",
            TransportResponse::json_body(200, &json!({"access_token": "abc", "expires_in": 7200})),
        );
        let credentials =
            ClientCredentials::new("id", "secret", "https://auth.example/oauth2/token").unwrap();

        assert_eq!(credentials.token(&transport).await.unwrap(), "abc");
        assert_eq!(credentials.token(&transport).await.unwrap(), "abc");
        assert_eq!(transport.count(reqwest::Method::POST, "/oauth2/token"), 1);

        let request = &transport.requests()[0];
        match &request.body {
            Some(PostBody::Form(fields)) => {
                let grant = ("grant_type".to_string(), "client_credentials".to_string());
                assert!(fields.contains(&grant));
            }
            other => panic!("expected form body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        let transport = ScriptedTransport::new();
        transport
            .on_post(
                "/token",
                TransportResponse::json_body(
                    200,
                    &json!({"access_token": "first", "expires_in": 10}),
                ),
            )
            .on_post(
                "/token",
                TransportResponse::json_body(
                    200,
                    &json!({"access_token": "second", "expires_in": 7200}),
                ),
            );
        let credentials = ClientCredentials::new("id", "secret", "https://auth/token").unwrap();

        // 10s lifetime minus the 30s margin is already expired.
        assert_eq!(credentials.token(&transport).await.unwrap(), "first");
        assert_eq!(credentials.token(&transport).await.unwrap(), "second");
    }

    #[test]
    fn test_remote_expiry_bounds() {
        assert_eq!(remote_expiry(1_000, 60).unwrap(), 61_000);
        assert!(remote_expiry(1_000, -1).is_err());
        assert!(remote_expiry(1_000, i64::MAX / 10).is_err());
    }

    #[tokio::test]
    async fn test_oversized_lifetime_is_invalid_response() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/token",
            TransportResponse::json_body(
                200,
                &json!({"access_token": "abc", "expires_in": i64::MAX / 10}),
            ),
        );
        let credentials = ClientCredentials::new("id", "secret", "https://auth/token").unwrap();

        let err = credentials.token(&transport).await.unwrap_err();
        assert!(err.to_string().contains("expires_in"));
        assert!(credentials.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_negative_lifetime_is_invalid_response() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/token",
            TransportResponse::json_body(200, &json!({"access_token": "abc", "expires_in": -5})),
        );
        let credentials = ClientCredentials::new("id", "secret", "https://auth/token").unwrap();

        assert!(credentials.token(&transport).await.is_err());
        assert!(credentials.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_error_body_is_rejected() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/token",
            TransportResponse::json_body(
                200,
                &json!({"error": {"code": 400, "message": "Invalid client_id"}}),
            ),
        );
        let credentials = ClientCredentials::new("id", "secret", "https://auth/token").unwrap();

        let err = credentials.token(&transport).await.unwrap_err();
        assert!(err.to_string().contains("Invalid client_id"));
        assert!(credentials.cached().await.is_none());
    }
}
