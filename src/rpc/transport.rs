//! JSON-RPC 2.0 transport over HTTP
//!
//! Maps transport and node failures onto the crate error taxonomy so the
//! resilient caller can tell throttling apart from reverts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// Minimal JSON-RPC client for an Ethereum-compatible node
pub struct NodeClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl NodeClient {
    /// Create a new node client
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue a single JSON-RPC request (no retry; callers wrap this)
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("rpc #{} {}", id, method);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RpcTimeout(self.timeout.as_millis() as u64)
                } else {
                    Error::from(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("{} returned 429", method)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_provider_message(format!(
                "{} HTTP {}: {}",
                method, status, text
            )));
        }

        let text = response.text().await.map_err(Error::from)?;
        parse_response(method, &text)
    }
}

/// Decode a JSON-RPC response body into a result or a classified error
pub fn parse_response<T: DeserializeOwned>(method: &str, body: &str) -> Result<T> {
    let response: RpcResponse<T> = serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("{} response: {}", method, e)))?;

    if let Some(error) = response.error {
        return Err(classify_rpc_error(&error));
    }

    match response.result {
        Some(result) => Ok(result),
        // `null` results (e.g. pending receipts) deserialize through Option<T>
        None => serde_json::from_value(Value::Null)
            .map_err(|_| Error::Rpc(format!("{} returned no result", method))),
    }
}

/// Map a node error object onto the crate taxonomy
pub fn classify_rpc_error(error: &RpcErrorObject) -> Error {
    let message = error.message.clone();
    let lower = message.to_lowercase();
    let data = error.data.as_ref().and_then(|d| match d {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    });

    if error.code == 3 || lower.contains("execution reverted") {
        let empty = data.as_deref().map_or(true, |d| d.is_empty() || d == "0x");
        return if empty && !lower.contains("execution reverted:") {
            Error::CallException { data }
        } else {
            Error::ContractReverted { message, data }
        };
    }

    if error.code == -32602 {
        return Error::InvalidArgument(message);
    }

    if lower.contains("insufficient funds") {
        return Error::InsufficientFunds(message);
    }

    Error::from_provider_message(message)
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Serialization(format!("quantity missing 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("invalid quantity {}: {}", value, e)))
}

/// Encode a quantity as minimal `0x` hex
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}
