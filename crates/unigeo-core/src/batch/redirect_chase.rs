//! Redirect-chase batch protocol
//!
//! The batch is POSTed with a short server-side wait hint. If it is not done
//! within that window the service answers `303 See Other` with a location to
//! poll. Polling that location returns `200` with the result, or `202` with a
//! new location to poll next.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::adapter::BatchGeocode;
use crate::batch::{check_cancelled, BatchConfig};
use crate::error::{Error, Result};
use crate::http::{params, HttpError, Params, PostBody, Transport, TransportResponse};
use crate::types::{BatchEntry, BatchOutcome, Query, ResultItem};

/// Public TomTom batch submission endpoint
pub const DEFAULT_BATCH_URL: &str = "https://api.tomtom.com/search/2/batch.json";

/// Base used to resolve relative poll locations
pub const DEFAULT_BASE_URL: &str = "https://api.tomtom.com";

const STATUS_READY: u16 = 200;
const STATUS_PENDING: u16 = 202;
const STATUS_SEE_OTHER: u16 = 303;
const STATUS_RATE_LIMITED: u16 = 429;

/// Provider hooks for the per-item part of a redirect-chase batch
pub trait BatchItemCodec: Send + Sync {
    /// Relative request path, with query string, for one batch item
    fn item_query(&self, query: &Query) -> String;

    /// Records from one successful item's `response` object
    fn parse_item(&self, response: &Value) -> Result<Vec<ResultItem>>;
}

/// Endpoint locations for the redirect-chase protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectChaseEndpoints {
    pub batch_url: String,
    pub base_url: String,
}

impl Default for RedirectChaseEndpoints {
    fn default() -> Self {
        Self {
            batch_url: DEFAULT_BATCH_URL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl RedirectChaseEndpoints {
    /// Resolve a location header, relative or absolute, against the base
    pub fn resolve(&self, location: &str) -> Result<String> {
        let base = Url::parse(&self.base_url).map_err(|e| {
            Error::config(format!("invalid batch base url {}: {}", self.base_url, e))
        })?;
        base.join(location)
            .map(String::from)
            .map_err(|e| Error::protocol(format!("invalid poll location {:?}: {}", location, e)))
    }
}

/// Interpretation of one submit or poll response
#[derive(Debug, Clone, PartialEq)]
pub enum ChaseStep {
    /// Not ready yet; poll this location next
    Follow(String),
    /// Final batch body
    Ready(Vec<BatchItemResponse>),
}

/// One item of the final batch body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchItemResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Deserialize)]
struct BatchResponseBody {
    #[serde(rename = "batchItems")]
    batch_items: Vec<BatchItemResponse>,
}

/// Engine for the redirect-chase batch protocol
pub struct RedirectChaseBatchEngine {
    provider: String,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn BatchItemCodec>,
    endpoints: RedirectChaseEndpoints,
    auth: Params,
    config: BatchConfig,
    cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for RedirectChaseBatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectChaseBatchEngine")
            .field("provider", &self.provider)
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish()
    }
}

impl RedirectChaseBatchEngine {
    pub fn new(
        provider: impl Into<String>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn BatchItemCodec>,
        endpoints: RedirectChaseEndpoints,
        auth: Params,
        config: BatchConfig,
    ) -> Self {
        Self {
            provider: provider.into(),
            transport,
            codec,
            endpoints,
            auth,
            config,
            cancellation: None,
        }
    }

    /// Stop chasing once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// JSON submission payload
    pub fn submission_body(&self, queries: &[Query]) -> Value {
        let items: Vec<Value> = queries
            .iter()
            .map(|query| json!({ "query": self.codec.item_query(query) }))
            .collect();
        json!({ "batchItems": items })
    }

    /// POST the batch and return the first location to poll
    pub async fn submit(&self, queries: &[Query]) -> Result<String> {
        check_cancelled(self.cancellation.as_ref(), "submit")?;
        let wait = self.config.wait_time_seconds.to_string();
        let mut request_params = self.auth.clone();
        request_params.extend(params([("waitTimeSeconds", wait.as_str())]));

        let response = self
            .transport
            .post(
                &self.endpoints.batch_url,
                &request_params,
                PostBody::Json(self.submission_body(queries)),
            )
            .await?;

        if response.status != STATUS_SEE_OTHER {
            return Err(submit_error(&response));
        }
        let location = response.header("location").ok_or_else(|| {
            Error::protocol("batch submission was accepted without a location to poll")
        })?;

        info!(provider = %self.provider, items = queries.len(), "batch submitted");
        Ok(location.to_string())
    }

    /// Interpret one poll response
    pub fn classify(response: &TransportResponse) -> Result<ChaseStep> {
        match response.status {
            STATUS_READY => {
                let body: BatchResponseBody = response.json()?;
                Ok(ChaseStep::Ready(body.batch_items))
            }
            STATUS_PENDING => response
                .header("location")
                .map(|location| ChaseStep::Follow(location.to_string()))
                .ok_or_else(|| Error::protocol("pending batch response carries no location")),
            STATUS_RATE_LIMITED => Err(Error::RateLimit {
                message: HttpError::from_response(response).message,
            }),
            status => Err(Error::Http {
                message: format!("unexpected status {} while polling batch", status),
                status_code: Some(status),
                source: None,
            }),
        }
    }

    /// Follow poll locations until the result is ready or the hop budget runs out
    pub async fn chase(&self, first_location: String) -> Result<Vec<BatchItemResponse>> {
        let max_hops = self.config.max_redirect_hops;
        let mut location = first_location;

        for hop in 1..=max_hops {
            check_cancelled(self.cancellation.as_ref(), "batch poll")?;
            let url = self.endpoints.resolve(&location)?;
            let response = self.transport.get(&url, &self.auth).await?;

            match Self::classify(&response) {
                Ok(ChaseStep::Ready(items)) => {
                    info!(provider = %self.provider, hops = hop, "batch ready");
                    return Ok(items);
                }
                Ok(ChaseStep::Follow(next)) => {
                    debug!(hop, "batch still pending");
                    location = next;
                }
                Err(error) => {
                    warn!(provider = %self.provider, hop, %error, "batch poll failed");
                    return Err(error);
                }
            }
        }

        Err(Error::Timeout {
            message: "batch ended without results after the allotted long-poll window".to_string(),
            attempts: max_hops,
        })
    }

    /// Map final items to outcome entries, one per query
    pub fn assemble(
        &self,
        items: Vec<BatchItemResponse>,
        query_count: usize,
    ) -> Result<BatchOutcome> {
        if items.len() != query_count {
            return Err(Error::protocol(format!(
                "batch returned {} items for {} queries",
                items.len(),
                query_count
            )));
        }

        Ok(items
            .into_iter()
            .map(|item| {
                if item.status_code != STATUS_READY {
                    return BatchEntry::failure(format!("statusCode: {}", item.status_code));
                }
                match self.codec.parse_item(&item.response) {
                    Ok(records) => BatchEntry::success(records),
                    Err(error) => BatchEntry::failure(error.to_string()),
                }
            })
            .collect())
    }

    /// Submit, chase and assemble in one call
    pub async fn run(&self, queries: &[Query]) -> Result<BatchOutcome> {
        let location = self.submit(queries).await?;
        let items = self.chase(location).await?;
        self.assemble(items, queries.len())
    }
}

#[async_trait]
impl BatchGeocode for RedirectChaseBatchEngine {
    async fn batch_geocode(&self, queries: &[Query]) -> Result<BatchOutcome> {
        self.run(queries).await
    }
}

/// Terminal error for a submission that was not redirected
fn submit_error(response: &TransportResponse) -> Error {
    let message = if response.is_json() {
        HttpError::from_response(response).message
    } else {
        response.text().to_string()
    };

    if response.status == STATUS_RATE_LIMITED {
        return Error::RateLimit { message };
    }
    Error::Http {
        message,
        status_code: Some(response.status),
        source: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use reqwest::Method;

    struct LabelCodec;

    impl BatchItemCodec for LabelCodec {
        fn item_query(&self, query: &Query) -> String {
            format!("/geocode/{}.json", query.text())
        }

        fn parse_item(&self, response: &Value) -> Result<Vec<ResultItem>> {
            let labels = response["results"]
                .as_array()
                .ok_or_else(|| Error::protocol("no results array"))?;
            Ok(labels
                .iter()
                .map(|label| {
                    let mut item = ResultItem::for_provider("tomtom");
                    item.formatted_address = label.as_str().map(str::to_string);
                    item
                })
                .collect())
        }
    }

    fn engine(transport: &ScriptedTransport, config: BatchConfig) -> RedirectChaseBatchEngine {
        RedirectChaseBatchEngine::new(
            "tomtom",
            Arc::new(transport.clone()),
            Arc::new(LabelCodec),
            RedirectChaseEndpoints::default(),
            params([("key", "k")]),
            config,
        )
    }

    fn see_other(location: &str) -> TransportResponse {
        TransportResponse::new(303, "").with_header("Location", location)
    }

    fn ready(items: Value) -> TransportResponse {
        TransportResponse::json_body(200, &json!({ "batchItems": items }))
    }

    fn queries(texts: &[&str]) -> Vec<Query> {
        texts.iter().map(|t| Query::from(*t)).collect()
    }

    #[test]
    fn test_location_resolution() {
        let endpoints = RedirectChaseEndpoints::default();
        assert_eq!(
            endpoints.resolve("/search/2/batch/abc").unwrap(),
            "https://api.tomtom.com/search/2/batch/abc"
        );
        assert_eq!(
            endpoints.resolve("https://other.example/b/1").unwrap(),
            "https://other.example/b/1"
        );
    }

    #[test]
    fn test_submission_body_shape() {
        let transport = ScriptedTransport::new();
        let body =
            engine(&transport, BatchConfig::default()).submission_body(&queries(&["a", "b"]));
        assert_eq!(
            body,
            json!({"batchItems": [{"query": "/geocode/a.json"}, {"query": "/geocode/b.json"}]})
        );
    }

    #[tokio::test]
    async fn test_follows_redirects_until_ready() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get(
            "/batch/1",
            TransportResponse::new(202, "").with_header("Location", "/search/2/batch/2"),
        );
        transport.on_get(
            "/batch/2",
            ready(json!([
                {"statusCode": 200, "response": {"results": ["A1", "A2"]}},
                {"statusCode": 400, "response": {"errorText": "bad query"}}
            ])),
        );

        let outcome = engine(&transport, BatchConfig::default())
            .run(&queries(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome[0].data.len(), 2);
        assert_eq!(outcome[0].data[1].formatted_address.as_deref(), Some("A2"));
        assert_eq!(outcome[1].error.as_deref(), Some("statusCode: 400"));
        assert!(outcome[1].data.is_empty());

        let submit = &transport.requests()[0];
        assert_eq!(submit.param("waitTimeSeconds"), Some("10"));
        assert_eq!(submit.param("key"), Some("k"));
    }

    #[tokio::test]
    async fn test_pending_poll_without_location_is_protocol_violation() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get("/batch/1", TransportResponse::new(202, ""));

        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert_eq!(transport.count(Method::GET, "/batch/1"), 1);
    }

    #[tokio::test]
    async fn test_pending_submit_without_location_is_protocol_violation() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", TransportResponse::new(303, ""));

        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_stops_without_further_polling() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get("/batch/1", TransportResponse::new(429, "slow down"));

        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimit { .. }));
        assert_eq!(transport.count(Method::GET, "/batch/1"), 1);
    }

    #[tokio::test]
    async fn test_hop_budget_exhaustion_times_out() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get(
            "/batch/1",
            TransportResponse::new(202, "").with_header("Location", "/search/2/batch/1"),
        );
        let config = BatchConfig {
            max_redirect_hops: 4,
            ..Default::default()
        };

        let err = engine(&transport, config).run(&queries(&["a"])).await.unwrap_err();

        match err {
            Error::Timeout { message, attempts } => {
                assert!(message.contains("allotted long-poll window"));
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(transport.count(Method::GET, "/batch/1"), 4);
    }

    #[tokio::test]
    async fn test_item_count_mismatch_is_protocol_violation() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get(
            "/batch/1",
            ready(json!([{"statusCode": 200, "response": {"results": []}}])),
        );

        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_submit_error_uses_json_message_or_raw_text() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/batch.json",
            TransportResponse::json_body(403, &json!({"errorText": "Developer Inactive"})),
        );
        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(403));
        assert!(err.to_string().contains("Developer Inactive"));

        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", TransportResponse::new(500, "gateway melted"));
        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gateway melted"));
    }

    #[tokio::test]
    async fn test_unexpected_poll_status() {
        let transport = ScriptedTransport::new();
        transport.on_post("/batch.json", see_other("/search/2/batch/1"));
        transport.on_get("/batch/1", TransportResponse::new(410, "gone"));

        let err = engine(&transport, BatchConfig::default())
            .run(&queries(&["a"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(410));
    }

    #[tokio::test]
    async fn test_cancelled_before_chase() {
        let transport = ScriptedTransport::new();
        let token = CancellationToken::new();
        token.cancel();
        let engine = engine(&transport, BatchConfig::default()).with_cancellation(token);

        let err = engine.chase("/search/2/batch/1".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(transport.requests().is_empty());
    }
}
