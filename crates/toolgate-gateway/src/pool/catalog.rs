//! Tool catalog discovery with bounded retry.
//!
//! After a connection lands, the fetcher asks the backend for its tool list
//! and caches it on the instance. Failures back off exponentially with a
//! multi-minute base; when the attempt budget runs out the backend is marked
//! failed and disabled in storage so restarts do not resurrect a backend
//! that cannot describe itself.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use toolgate_core::{BackendRepository, ConnectError, Tool};

use super::instance::BackendInstance;

/// Retry policy for catalog fetches. Injectable so tests can shrink the
/// delays to milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct CatalogConfig {
    pub max_attempts: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Upper bound on any configured request timeout.
    pub timeout_ceiling: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            timeout_ceiling: Duration::from_secs(60),
        }
    }
}

pub struct CatalogFetcher {
    backends: Arc<dyn BackendRepository>,
    config: CatalogConfig,
}

impl CatalogFetcher {
    pub fn new(backends: Arc<dyn BackendRepository>, config: CatalogConfig) -> Self {
        Self { backends, config }
    }

    /// Effective per-request timeout: the backend override, clamped to the
    /// ceiling.
    fn effective_timeout(&self, override_secs: Option<u64>) -> Duration {
        override_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.request_timeout)
            .min(self.config.timeout_ceiling)
    }

    /// Fetch and cache the backend's tool list, retrying with exponential
    /// backoff. On exhaustion the backend is marked failed and persisted
    /// disabled.
    pub async fn fetch(
        &self,
        instance: Arc<BackendInstance>,
        timeout_override: Option<u64>,
    ) -> Result<Vec<Tool>, ConnectError> {
        let timeout = self.effective_timeout(timeout_override);
        let mut last_error = ConnectError::Closed;

        for attempt in 1..=self.config.max_attempts {
            let Some(client) = instance.client().await else {
                // Connection went away underneath us; nothing to retry.
                return Err(ConnectError::Closed);
            };

            match client.request("tools/list", None, timeout).await {
                Ok(result) => match parse_tools(&result) {
                    Ok(tools) => {
                        info!(
                            backend = %instance.name,
                            tool_count = tools.len(),
                            "Tool catalog fetched"
                        );
                        instance.set_tools(tools.clone());
                        return Ok(tools);
                    }
                    Err(e) => {
                        warn!(backend = %instance.name, attempt, error = %e, "Malformed tool catalog");
                        last_error = e;
                    }
                },
                Err(e) => {
                    warn!(backend = %instance.name, attempt, error = %e, "Tool catalog fetch failed");
                    last_error = e;
                }
            }

            if attempt < self.config.max_attempts {
                let delay = self.config.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            backend = %instance.name,
            attempts = self.config.max_attempts,
            error = %last_error,
            "Tool catalog retries exhausted; disabling backend"
        );
        instance.mark_failed(format!("tool catalog unavailable: {last_error}"));
        if let Err(e) = self.backends.set_enabled(&instance.name, false).await {
            error!(backend = %instance.name, "Failed to persist disabled flag: {e}");
        }
        Err(last_error)
    }
}

/// Parse a `tools/list` result payload.
fn parse_tools(result: &Value) -> Result<Vec<Tool>, ConnectError> {
    let tools = result
        .get("tools")
        .ok_or_else(|| ConnectError::Protocol("tool list response missing 'tools'".into()))?;
    serde_json::from_value(tools.clone())
        .map_err(|e| ConnectError::Protocol(format!("invalid tool list: {e}")))
}
