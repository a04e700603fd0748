//! In-memory transport with scripted responses
//!
//! Routes are matched on method and URL path suffix (the query string is
//! ignored). Each route holds a queue of responses; the last queued response
//! is sticky and keeps answering once the queue drains to it, which keeps
//! "still running" poll scripts short.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;

use crate::http::transport::{Params, PostBody, Transport, TransportResponse};
use crate::Result;

/// A request observed by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub params: Params,
    pub body: Option<PostBody>,
}

impl RecordedRequest {
    /// First value of a query parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
struct Route {
    method: Method,
    suffix: String,
    responses: VecDeque<TransportResponse>,
}

#[derive(Debug, Default)]
struct Script {
    routes: Vec<Route>,
    requests: Vec<RecordedRequest>,
}

/// Transport answering from a script instead of the network
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for GET requests whose path ends with `suffix`
    pub fn on_get(&self, suffix: &str, response: TransportResponse) -> &Self {
        self.push(Method::GET, suffix, response)
    }

    /// Queue a response for POST requests whose path ends with `suffix`
    pub fn on_post(&self, suffix: &str, response: TransportResponse) -> &Self {
        self.push(Method::POST, suffix, response)
    }

    fn push(&self, method: Method, suffix: &str, response: TransportResponse) -> &Self {
        let mut script = self.lock();
        match script
            .routes
            .iter_mut()
            .find(|route| route.method == method && route.suffix == suffix)
        {
            Some(route) => route.responses.push_back(response),
            None => script.routes.push(Route {
                method,
                suffix: suffix.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// Every request seen so far, in call order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests matching a method and path suffix
    pub fn count(&self, method: Method, suffix: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && path_of(&r.url).ends_with(suffix))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A test that panicked mid-call poisons the lock; the script is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn answer(&self, request: RecordedRequest) -> Result<TransportResponse> {
        let mut script = self.lock();
        let path = path_of(&request.url).to_string();
        let method = request.method.clone();
        let url = request.url.clone();
        script.requests.push(request);

        // Longest matching suffix wins, so "/jobs/1/result" beats "/result".
        let route = script
            .routes
            .iter_mut()
            .filter(|route| route.method == method && path.ends_with(&route.suffix))
            .max_by_key(|route| route.suffix.len());

        match route {
            Some(route) if route.responses.len() > 1 => route
                .responses
                .pop_front()
                .ok_or_else(|| crate::Error::protocol("scripted route drained")),
            Some(route) => route
                .responses
                .front()
                .cloned()
                .ok_or_else(|| crate::Error::protocol("scripted route drained")),
            None => Err(crate::Error::Http {
                message: format!("no scripted response for {} {}", method, url),
                status_code: None,
                source: None,
            }),
        }
    }
}

fn path_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, params: &Params) -> Result<TransportResponse> {
        self.answer(RecordedRequest {
            method: Method::GET,
            url: url.to_string(),
            params: params.clone(),
            body: None,
        })
    }

    async fn post(&self, url: &str, params: &Params, body: PostBody) -> Result<TransportResponse> {
        self.answer(RecordedRequest {
            method: Method::POST,
            url: url.to_string(),
            params: params.clone(),
            body: Some(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_response_is_sticky() {
        let transport = ScriptedTransport::new();
        transport
            .on_get("/status", TransportResponse::new(200, "first"))
            .on_get("/status", TransportResponse::new(200, "second"));

        let none = Params::new();
        assert_eq!(transport.get("https://x/status", &none).await.unwrap().body, "first");
        assert_eq!(transport.get("https://x/status", &none).await.unwrap().body, "second");
        assert_eq!(transport.get("https://x/status", &none).await.unwrap().body, "second");
        assert_eq!(transport.count(Method::GET, "/status"), 3);
    }

    #[tokio::test]
    async fn test_longest_suffix_wins_and_query_is_ignored() {
        let transport = ScriptedTransport::new();
        transport
            .on_get("/jobs/1", TransportResponse::new(200, "status"))
            .on_get("/jobs/1/result", TransportResponse::new(200, "result"));

        let none = Params::new();
        let response = transport.get("https://x/jobs/1/result?key=k", &none).await.unwrap();
        assert_eq!(response.body, "result");
        let response = transport.get("https://x/jobs/1", &none).await.unwrap();
        assert_eq!(response.body, "status");
    }

    #[tokio::test]
    async fn test_unscripted_request_fails() {
        let transport = ScriptedTransport::new();
        let err = transport.get("https://x/none", &Params::new()).await.unwrap_err();
        assert!(err.to_string().contains("no scripted response"));
    }
}
