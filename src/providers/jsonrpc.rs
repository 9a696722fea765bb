//! JSON-RPC 2.0 client over the request cache

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::{FetchOptions, RequestCache};
use crate::error::{looks_like_rate_limit, GatewayError, Result};
use crate::transport::HttpRequest;

/// RPC request
#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    /// JSON-RPC version
    jsonrpc: &'static str,
    /// Method name
    method: &'a str,
    /// Method parameters
    params: &'a Value,
    /// Request ID
    id: u64,
}

/// RPC response
#[derive(Deserialize, Debug)]
struct RpcResponse {
    /// Result value
    #[serde(default)]
    result: Option<Value>,
    /// Error value
    #[serde(default)]
    error: Option<RpcError>,
}

/// RPC error object
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

impl RpcError {
    /// Map to the gateway taxonomy for read calls
    pub fn into_gateway_error(self, method: &str) -> GatewayError {
        let message = format!("RPC error in {}: {} (code: {})", method, self.message, self.code);
        if looks_like_rate_limit(&self.message) || self.code == -32005 {
            GatewayError::RateLimited(message)
        } else {
            GatewayError::network(message)
        }
    }
}

/// JSON-RPC client for one node URL
pub struct JsonRpcClient {
    url: String,
    cache: Arc<RequestCache>,
    /// Request ID counter
    request_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str, cache: Arc<RequestCache>) -> Self {
        Self {
            url: url.to_string(),
            cache,
            request_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Only successful replies are worth storing
    fn is_success(response: &Value) -> bool {
        response.get("error").map_or(true, Value::is_null)
    }

    /// Cache key that ignores the request id
    fn cache_key(&self, method: &str, params: &Value) -> String {
        format!("rpc {} {} {}", self.url, method, params)
    }

    /// Call and keep the RPC-level error separate from transport errors
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        options: FetchOptions,
    ) -> Result<std::result::Result<Value, RpcError>> {
        debug!("Calling RPC method: {}", method);
        let body = serde_json::to_value(RpcRequest {
            jsonrpc: "2.0",
            method,
            params: &params,
            id: self.next_request_id(),
        })?;
        let options = options.with_key(self.cache_key(method, &params));
        let response = self
            .cache
            .fetch_json_checked(HttpRequest::post_json(self.url.as_str(), &body), options, Self::is_success)
            .await?;

        let response: RpcResponse = serde_json::from_value(response)
            .map_err(|e| GatewayError::invalid_data(method, format!("malformed RPC response: {}", e)))?;
        match (response.result, response.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Ok(Ok(Value::Null)),
        }
    }

    /// Call, mapping RPC errors into the gateway taxonomy
    pub async fn call(&self, method: &str, params: Value, options: FetchOptions) -> Result<Value> {
        self.request(method, params, options)
            .await?
            .map_err(|e| e.into_gateway_error(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    const URL: &str = "https://rpc.example.org";

    #[tokio::test]
    async fn test_call_result_and_error() {
        let transport = Arc::new(MockTransport::new());
        transport.route_rpc(URL, "eth_blockNumber", json!("0x10"));
        transport.route_rpc_error(URL, "eth_chainId", -32000, "header not found");
        transport.route_rpc_error(URL, "eth_gasPrice", -32005, "daily request count exceeded");
        let client = JsonRpcClient::new(URL, Arc::new(RequestCache::new(transport)));

        let height = client.call("eth_blockNumber", json!([]), FetchOptions::uncached()).await.unwrap();
        assert_eq!(height, json!("0x10"));

        let err = client.call("eth_chainId", json!([]), FetchOptions::uncached()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network { .. }));
        assert!(!err.is_rate_limit());

        let err = client.call("eth_gasPrice", json!([]), FetchOptions::uncached()).await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_cached_call_ignores_request_id() {
        let transport = Arc::new(MockTransport::new());
        transport.route_rpc(URL, "eth_blockNumber", json!("0x10"));
        let client = JsonRpcClient::new(URL, Arc::new(RequestCache::new(transport.clone())));

        for _ in 0..3 {
            client.call("eth_blockNumber", json!([]), FetchOptions::ttl(60_000)).await.unwrap();
        }
        assert_eq!(transport.calls(URL), 1);
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_cached() {
        let transport = Arc::new(MockTransport::new());
        transport.route_rpc_error(URL, "eth_getBalance", -32000, "header not found");
        let client = JsonRpcClient::new(URL, Arc::new(RequestCache::new(transport.clone())));

        let err = client.call("eth_getBalance", json!(["0xabc", "latest"]), FetchOptions::ttl(60_000)).await;
        assert!(err.is_err());

        transport.route_rpc(URL, "eth_getBalance", json!("0x2a"));
        let balance = client
            .call("eth_getBalance", json!(["0xabc", "latest"]), FetchOptions::ttl(60_000))
            .await
            .unwrap();
        assert_eq!(balance, json!("0x2a"));
        assert_eq!(transport.calls(URL), 2);
    }
}
