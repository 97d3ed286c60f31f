//! Invocation router - the public call surface.
//!
//! Resolves a backend, verifies it is connected, merges the caller's
//! permitted secrets into the call arguments, and forwards the call. Never
//! retries; a disconnected backend is the caller's signal to wait or
//! re-enable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use toolgate_core::{BackendRepository, BackendStatus, InvokeError, SecretStore, Tool};

use super::instance::ConnectionTable;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const CALL_TIMEOUT_CEILING: Duration = Duration::from_secs(60);

/// One backend's slice of the merged catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogEntry {
    pub backend: String,
    pub tools: Vec<Tool>,
}

pub struct InvocationRouter {
    table: Arc<ConnectionTable>,
    backends: Arc<dyn BackendRepository>,
    secrets: Arc<dyn SecretStore>,
}

impl InvocationRouter {
    pub fn new(
        table: Arc<ConnectionTable>,
        backends: Arc<dyn BackendRepository>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            table,
            backends,
            secrets,
        }
    }

    /// Invoke `tool` on `backend` on behalf of `caller`.
    pub async fn call_tool(
        &self,
        caller: &str,
        backend: &str,
        tool: &str,
        args: Value,
    ) -> Result<Value, InvokeError> {
        let config = self
            .backends
            .get(backend)
            .await
            .map_err(|e| InvokeError::Storage(e.to_string()))?
            .ok_or_else(|| InvokeError::NotFound(backend.to_string()))?;

        let instance = self
            .table
            .get(backend)
            .filter(|_| config.enabled)
            .ok_or_else(|| {
                InvokeError::NotConnected(backend.to_string(), BackendStatus::Disconnected)
            })?;

        if instance.status() != BackendStatus::Connected {
            return Err(InvokeError::NotConnected(
                backend.to_string(),
                instance.status(),
            ));
        }
        let client = instance.client().await.ok_or_else(|| {
            InvokeError::NotConnected(backend.to_string(), instance.status())
        })?;

        let snapshot = self
            .secrets
            .secrets_for(caller)
            .await
            .map_err(|e| InvokeError::Secrets(e.to_string()))?;

        let mut allowlist = config.secret_names.clone();
        if let Some(name) = &config.secret_name {
            if !allowlist.contains(name) {
                allowlist.push(name.clone());
            }
        }
        if allowlist.is_empty() && !snapshot.is_empty() {
            // Kept for configurations that predate per-backend allowlists.
            warn!(
                caller = %caller,
                backend = %backend,
                "Backend declares no secret allowlist; forwarding all caller secrets"
            );
        }
        let args = merge_secrets(args, &snapshot, &allowlist);

        debug!(caller = %caller, backend = %backend, tool = %tool, "Forwarding tool call");

        let timeout = config
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
            .min(CALL_TIMEOUT_CEILING);

        let params = serde_json::json!({
            "name": tool,
            "arguments": args,
        });
        let result = client.request("tools/call", Some(params), timeout).await?;
        Ok(result)
    }

    /// Merged tool catalog across connected, enabled backends.
    pub async fn list_tools(&self) -> Result<Vec<CatalogEntry>, InvokeError> {
        let configs = self
            .backends
            .list_enabled()
            .await
            .map_err(|e| InvokeError::Storage(e.to_string()))?;

        let mut entries = Vec::new();
        for config in configs {
            let Some(instance) = self.table.get(&config.name) else {
                continue;
            };
            if instance.status() != BackendStatus::Connected {
                continue;
            }
            entries.push(CatalogEntry {
                backend: config.name,
                tools: instance.tools(),
            });
        }
        Ok(entries)
    }
}

/// Merge permitted secrets into the call arguments. An empty allowlist means
/// the legacy everything path. Caller-supplied keys always win over secrets.
fn merge_secrets(args: Value, snapshot: &HashMap<String, String>, allowlist: &[String]) -> Value {
    let mut object = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        // Non-object arguments pass through untouched; there is nowhere to
        // merge into.
        other => return other,
    };
    for (key, value) in snapshot {
        if !allowlist.is_empty() && !allowlist.contains(key) {
            continue;
        }
        object
            .entry(key.clone())
            .or_insert_with(|| Value::String(value.clone()));
    }
    Value::Object(object)
}
