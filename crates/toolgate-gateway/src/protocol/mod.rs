//! JSON-RPC 2.0 wire types and the client trait both transports implement.
//!
//! The gateway speaks a small subset of the protocol: an `initialize`
//! handshake, an `initialized` notification, `tools/list`, and `tools/call`.
//! Requests carry monotonically increasing numeric ids; responses are routed
//! back to the waiting caller by id.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolgate_core::ConnectError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Outgoing request or notification (no id).
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Standard handshake request.
    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "toolgate",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
        )
    }

    /// Notification confirming the handshake completed.
    pub fn initialized() -> Self {
        Self::notification("notifications/initialized", None)
    }
}

/// Incoming response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Unwrap into the result payload or a typed error.
    pub fn into_result(self) -> Result<Value, ConnectError> {
        if let Some(err) = self.error {
            return Err(ConnectError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| ConnectError::Protocol("response carried neither result nor error".into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Out-of-band events a live transport reports to its supervisor.
#[derive(Debug)]
pub enum TransportEvent {
    /// Non-fatal transport-level trouble, recorded as a diagnostic line.
    Error(String),
    /// The transport is gone and will accept no more requests.
    Closed,
}

/// A connected protocol endpoint. Both transports expose this surface; the
/// pool never sees which one it holds.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Issue a request and wait for its response payload.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ConnectError>;

    /// Best-effort orderly shutdown. Never fails; errors are logged.
    async fn shutdown(&self);
}
