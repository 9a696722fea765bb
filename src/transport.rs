//! HTTP transport
//!
//! This module handles:
//! - The `HttpTransport` seam every adapter and the cache talk through
//! - A reqwest implementation with bounded concurrency and retry of
//!   transient failures
//! - Decoding of JSON response bodies

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{header, Client};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::config::TransportConfig;
use crate::error::{looks_like_rate_limit, GatewayError, Result};

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Absolute URL
    pub url: String,
    /// Request body, sent verbatim
    pub body: Option<String>,
    /// Content type of the body
    pub content_type: Option<String>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
            content_type: None,
            headers: Vec::new(),
        }
    }

    /// POST with a JSON body
    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body.to_string()),
            content_type: Some("application/json".to_string()),
            headers: Vec::new(),
        }
    }

    /// POST with a plain-text body (raw transaction hex)
    pub fn post_text(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body.into()),
            content_type: Some("text/plain".to_string()),
            headers: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Default cache key: method + url + body
    pub fn cache_key(&self) -> String {
        format!(
            "{} {} {}",
            self.method.as_str(),
            self.url,
            self.body.as_deref().unwrap_or("")
        )
    }
}

/// Response as received; status handling is left to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Body text
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map non-2xx to an error and parse the body as JSON
    pub fn into_json(self, origin: &str) -> Result<Value> {
        if self.status == 429 {
            return Err(GatewayError::RateLimited(format!("{} returned 429", origin)));
        }
        if !self.is_success() {
            if looks_like_rate_limit(&self.body) {
                return Err(GatewayError::RateLimited(format!(
                    "{} returned {}: {}",
                    origin,
                    self.status,
                    truncate(&self.body)
                )));
            }
            return Err(GatewayError::Network {
                message: format!("{} failed with status: {} {}", origin, self.status, truncate(&self.body)),
                status: Some(self.status),
            });
        }
        serde_json::from_str(&self.body).map_err(|e| {
            GatewayError::invalid_data(origin, format!("response is not JSON: {}", e))
        })
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Seam for all outbound HTTP
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return whatever the server answered.
    /// `Err` only for transport-level failures.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    /// HTTP client
    client: Client,
    /// Transport configuration
    config: TransportConfig,
    /// Rate limiter
    rate_limiter: Arc<Semaphore>,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let rate_limiter = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self { client, config, rate_limiter })
    }

    /// Execute a single request without retry logic
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        debug!("Making {} request to {}", request.method.as_str(), request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if let Some(content_type) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            GatewayError::network(format!("Failed to send request to {}: {}", request.url, e))
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| GatewayError::Network {
            message: format!("Failed to read response from {}: {}", request.url, e),
            status: Some(status),
        })?;

        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| GatewayError::network(format!("Rate limiter closed: {}", e)))?;

        let mut retries = 0;
        loop {
            if retries > 0 {
                debug!(
                    "Retrying request to {} (attempt {}/{})",
                    request.url, retries, self.config.max_retries
                );
                sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            let outcome = self.execute(request).await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status),
                Err(err) => is_retryable_error(err),
            };
            if !retryable || retries >= self.config.max_retries {
                if retryable {
                    warn!("Giving up on {} after {} retries", request.url, retries);
                }
                return outcome;
            }
            retries += 1;
        }
    }
}

/// 429 and 5xx are worth another attempt
fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Check if a transport error is retryable
fn is_retryable_error(err: &GatewayError) -> bool {
    let err_string = err.to_string().to_lowercase();

    // Connection errors
    if err_string.contains("connection")
        || err_string.contains("timeout")
        || err_string.contains("timed out")
    {
        return true;
    }

    err.is_rate_limit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_includes_body() {
        let a = HttpRequest::post_json("https://x", &serde_json::json!({"a": 1}));
        let b = HttpRequest::post_json("https://x", &serde_json::json!({"a": 2}));
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(HttpRequest::get("https://x").cache_key(), "GET https://x ");
    }

    #[test]
    fn test_into_json_status_mapping() {
        let err = HttpResponse::new(429, "slow down").into_json("test").unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));

        let err = HttpResponse::new(500, "boom").into_json("test").unwrap_err();
        assert!(matches!(err, GatewayError::Network { status: Some(500), .. }));

        let err = HttpResponse::new(200, "<html>").into_json("test").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUpstreamData { .. }));

        let value = HttpResponse::new(200, "123456").into_json("test").unwrap();
        assert_eq!(value, serde_json::json!(123456));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(is_retryable_error(&GatewayError::network("connection reset")));
        assert!(!is_retryable_error(&GatewayError::network("bad request")));
    }
}
