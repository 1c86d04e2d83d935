mod wire;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::RpcError;
use crate::types::{NodeStats, Pod};

pub use wire::{PodsReply, RawPod, RawStats};

/// Port pods listen on for RPC when the roster does not advertise one.
pub const DEFAULT_RPC_PORT: u16 = 6000;

pub const JSONRPC_VERSION: &str = "2.0";

/// The slice of the pod RPC surface the monitor depends on.
#[async_trait]
pub trait PodRpc: Send + Sync {
    async fn get_pods_with_stats(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Vec<Pod>, RpcError>;

    async fn get_stats(&self, host: &str, port: u16, timeout: Duration)
        -> Result<NodeStats, RpcError>;

    async fn get_version(&self, host: &str, port: u16, timeout: Duration)
        -> Result<String, RpcError>;
}

/// Pods key the protocol version as `version`; `jsonrpc` is sent too for
/// stock JSON-RPC 2.0 servers.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    version: &'static str,
    jsonrpc: &'static str,
    method: &'a str,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// HTTP client for the pod RPC endpoint (`POST http://host:port/rpc`).
///
/// Cloning is cheap; clones share the connection pool and the request id counter.
#[derive(Clone)]
pub struct RpcClient {
    http: Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new() -> Result<Self, RpcError> {
        let http = Client::builder()
            .user_agent(format!("podwatch/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RpcError::Connect {
                endpoint: "<client>".to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Perform one RPC call. Either the full result is returned or an error; never a partial reply.
    ///
    /// The timeout covers connect, send and body read. When it expires the in-flight
    /// request future is dropped, which closes the underlying connection.
    pub async fn send(
        &self,
        host: &str,
        port: u16,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_request_id();
        let endpoint = rpc_endpoint(host, port);
        debug!("RPC {} -> {} (id={})", method, endpoint, id);

        let call = self.call(&endpoint, method, id, params.as_ref(), timeout);
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }

    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        id: u64,
        params: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let req = RpcRequest {
            version: JSONRPC_VERSION,
            jsonrpc: JSONRPC_VERSION,
            method,
            id,
            params,
        };

        let resp = self
            .http
            .post(endpoint)
            .timeout(timeout)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, method, timeout, e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(endpoint, method, timeout, e))?;

        if !status.is_success() {
            return Err(RpcError::parse(format!("HTTP {}", status.as_u16()), &body));
        }

        let reply: RpcReply = serde_json::from_str(&body)
            .map_err(|e| RpcError::parse(format!("invalid JSON: {}", e), &body))?;

        if let Some(reply_id) = reply.id.as_ref().and_then(Value::as_u64) {
            if reply_id != id {
                return Err(RpcError::parse(
                    format!("reply id {} does not match request id {}", reply_id, id),
                    &body,
                ));
            }
        }

        if let Some(err) = reply.error {
            return Err(RpcError::Protocol {
                code: err.code,
                message: err.message,
            });
        }

        reply
            .result
            .ok_or_else(|| RpcError::parse("reply has neither result nor error", &body))
    }
}

#[async_trait]
impl PodRpc for RpcClient {
    async fn get_pods_with_stats(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Vec<Pod>, RpcError> {
        let result = self
            .send(host, port, "get-pods-with-stats", None, timeout)
            .await?;
        let reply: PodsReply = decode(result)?;
        Ok(reply.into_pods())
    }

    async fn get_stats(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<NodeStats, RpcError> {
        let result = self.send(host, port, "get-stats", None, timeout).await?;
        let raw: RawStats = decode(result)?;
        Ok(raw.into())
    }

    async fn get_version(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<String, RpcError> {
        #[derive(Deserialize)]
        struct VersionReply {
            version: String,
        }

        let result = self.send(host, port, "get-version", None, timeout).await?;
        let reply: VersionReply = decode(result)?;
        Ok(reply.version)
    }
}

fn decode<T: serde::de::DeserializeOwned>(result: Value) -> Result<T, RpcError> {
    serde_json::from_value::<T>(result.clone())
        .map_err(|e| RpcError::parse(format!("unexpected result shape: {}", e), &result.to_string()))
}

fn rpc_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("http://[{}]:{}/rpc", host, port)
    } else {
        format!("http://{}:{}/rpc", host, port)
    }
}

fn transport_error(endpoint: &str, method: &str, timeout: Duration, e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout {
            method: method.to_string(),
            timeout,
        }
    } else {
        RpcError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
    }
}
