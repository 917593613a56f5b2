//! JSON-RPC ledger gateway adapter.
//!
//! Speaks JSON-RPC 2.0 over HTTP to a gateway that fronts the anchoring
//! contract:
//!
//! - `anchor_manifest(complaintId, manifestHash)` -> transaction hash
//! - `verify_manifest(complaintId)` -> bytes32 hex (all zeros when unknown)
//! - `get_anchor_events({fromBlock})` -> `ManifestAnchored` event list
//!
//! Nonce conflicts, gateway overload and timeouts are retried with
//! exponential backoff, then surfaced as `LedgerError::Transient`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapter::{checked_digest, is_zero_digest, LedgerAdapter, LedgerError};
use crate::manifest::normalize_digest;

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct JsonRpcLedgerConfig {
    /// Gateway endpoint (e.g. "http://localhost:8545")
    pub url: String,
    /// Bearer token for the gateway (optional)
    pub api_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Initial backoff between attempts (doubled each retry)
    pub backoff: Duration,
}

impl Default for JsonRpcLedgerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8545".to_string(),
            api_token: None,
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// `ManifestAnchored` event as returned by the gateway.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcAnchorEvent {
    complaint_id: i64,
    #[allow(dead_code)]
    manifest_hash: String,
}

/// Ledger adapter backed by a JSON-RPC gateway.
pub struct JsonRpcLedger {
    client: Client,
    config: JsonRpcLedgerConfig,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    /// Build the adapter. The HTTP client is created eagerly.
    pub fn new(config: JsonRpcLedgerConfig) -> Result<Self, LedgerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call a method, retrying transient failures.
    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.backoff;
        let mut attempt = 1;

        loop {
            match self.call_once(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        method,
                        attempt,
                        error = %e,
                        "Ledger call failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(LedgerError::Network(msg)) => return Err(LedgerError::Transient(msg)),
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut http_request = self.client.post(&self.config.url).json(&request);
        if let Some(token) = &self.config.api_token {
            http_request = http_request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Transient(format!("{} timed out", method))
            } else {
                LedgerError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(LedgerError::Transient(format!("HTTP {} from gateway", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::InvalidResponse(format!("HTTP {}: {}", status, body)));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(classify_rpc_error(error));
        }

        debug!(method, "Ledger call succeeded");
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Nonce races and pool congestion are transient; everything else is final.
fn classify_rpc_error(error: RpcErrorBody) -> LedgerError {
    let lowered = error.message.to_ascii_lowercase();
    let transient = ["nonce", "underpriced", "timeout", "timed out", "already known", "busy"]
        .iter()
        .any(|needle| lowered.contains(needle));

    if transient {
        LedgerError::Transient(error.message)
    } else {
        LedgerError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

#[async_trait]
impl LedgerAdapter for JsonRpcLedger {
    fn id(&self) -> &str {
        &self.config.url
    }

    async fn anchor(&self, complaint_id: i64, digest: &str) -> Result<String, LedgerError> {
        let digest = checked_digest(digest)?;
        let result = self
            .call("anchor_manifest", json!([complaint_id, format!("0x{}", digest)]))
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidResponse("anchor_manifest returned no transaction hash".into()))
    }

    async fn verify(&self, complaint_id: i64) -> Result<String, LedgerError> {
        let result = self.call("verify_manifest", json!([complaint_id])).await?;
        match result {
            Value::Null => Err(LedgerError::NotAnchored(complaint_id)),
            Value::String(hash) if is_zero_digest(&hash) => Err(LedgerError::NotAnchored(complaint_id)),
            Value::String(hash) => Ok(normalize_digest(&hash)),
            other => Err(LedgerError::InvalidResponse(format!(
                "verify_manifest returned {}",
                other
            ))),
        }
    }

    async fn enumerate_anchored_ids(&self) -> Result<BTreeSet<i64>, LedgerError> {
        let result = self
            .call("get_anchor_events", json!([{ "fromBlock": 0 }]))
            .await?;

        let events: Vec<RpcAnchorEvent> = serde_json::from_value(result)
            .map_err(|e| LedgerError::InvalidResponse(format!("Malformed event list: {}", e)))?;

        Ok(events.into_iter().map(|e| e.complaint_id).collect())
    }
}
