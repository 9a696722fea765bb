//! In-memory transport for tests
//!
//! `MockTransport` answers requests from a route table instead of the
//! network, counts calls per URL and can simulate latency.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

#[derive(Clone)]
struct Route {
    /// Exact URL, or a prefix when it ends with `*`
    url: String,
    method: Option<HttpMethod>,
    /// Substrings the body must contain
    body_contains: Vec<String>,
    outcome: Outcome,
}

#[derive(Clone)]
enum Outcome {
    Respond(HttpResponse),
    Fail(GatewayError),
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        let url_ok = match self.url.strip_suffix('*') {
            Some(prefix) => request.url.starts_with(prefix),
            None => request.url == self.url,
        };
        if !url_ok {
            return false;
        }
        if let Some(method) = self.method {
            if method != request.method {
                return false;
            }
        }
        let body = request.body.as_deref().unwrap_or("");
        self.body_contains.iter().all(|needle| body.contains(needle.as_str()))
    }
}

/// Route-table transport
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(&self, route: Route) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.retain(|r| {
            r.url != route.url || r.method != route.method || r.body_contains != route.body_contains
        });
        routes.push(route);
    }

    /// Answer `url` (any method) with a JSON body
    pub fn route_json(&self, url: &str, body: Value) {
        self.route_status(url, 200, &body.to_string());
    }

    /// Answer `url` with a status and raw body
    pub fn route_status(&self, url: &str, status: u16, body: &str) {
        self.push(Route {
            url: url.to_string(),
            method: None,
            body_contains: Vec::new(),
            outcome: Outcome::Respond(HttpResponse::new(status, body)),
        });
    }

    /// Answer POSTs to `url` whose body contains every needle
    pub fn route_post_matching(&self, url: &str, needles: &[&str], body: Value) {
        self.push(Route {
            url: url.to_string(),
            method: Some(HttpMethod::Post),
            body_contains: needles.iter().map(|s| s.to_string()).collect(),
            outcome: Outcome::Respond(HttpResponse::new(200, body.to_string())),
        });
    }

    /// Answer a JSON-RPC method on `url` with `result`
    pub fn route_rpc(&self, url: &str, method: &str, result: Value) {
        let needle = format!("\"method\":\"{}\"", method);
        self.route_post_matching(url, &[&needle], json!({"jsonrpc": "2.0", "id": 1, "result": result}));
    }

    /// Answer a JSON-RPC method on `url` with an error object
    pub fn route_rpc_error(&self, url: &str, method: &str, code: i64, message: &str) {
        let needle = format!("\"method\":\"{}\"", method);
        self.route_post_matching(
            url,
            &[&needle],
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}}),
        );
    }

    /// Fail requests to `url` at the transport level
    pub fn route_error(&self, url: &str, error: GatewayError) {
        self.push(Route {
            url: url.to_string(),
            method: None,
            body_contains: Vec::new(),
            outcome: Outcome::Fail(error),
        });
    }

    /// Requests sent to exactly `url`
    pub fn calls(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    /// Requests sent to URLs starting with `prefix`
    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    /// Every request seen so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|route| route.matches(request))
            .map(|route| route.outcome.clone());

        match outcome {
            Some(Outcome::Respond(response)) => Ok(response),
            Some(Outcome::Fail(err)) => Err(err),
            None => Ok(HttpResponse::new(404, format!("no route for {}", request.url))),
        }
    }
}
