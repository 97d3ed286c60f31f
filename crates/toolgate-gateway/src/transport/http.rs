//! Streaming-http transport.
//!
//! Each request is an HTTP POST carrying one JSON-RPC message; the endpoint
//! answers with a JSON body or a short event stream whose first response
//! event carries the payload. A session token negotiated during `initialize`
//! is echoed on every subsequent request.
//!
//! The legacy variant predates session negotiation: same POST shape, but no
//! session token is ever sent or captured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toolgate_core::{ConnectError, ReconnectPolicy, TransportKind};

use super::{Established, Transport, TransportOptions};
use crate::pool::CredentialProvider;
use crate::protocol::{ProtocolClient, RpcRequest, RpcResponse, TransportEvent};

/// Header carrying the negotiated session token.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Streaming-http transport for remote backends
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    session_token: Option<String>,
    reconnect: ReconnectPolicy,
    legacy: bool,
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(
        url: String,
        headers: HashMap<String, String>,
        session_token: Option<String>,
        reconnect: ReconnectPolicy,
        options: TransportOptions,
    ) -> Self {
        Self {
            url,
            headers,
            session_token,
            reconnect,
            legacy: false,
            options,
        }
    }

    /// Switch to the legacy single-direction variant.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Static headers applied to every request. A managed credential
    /// supersedes any statically configured authorization header, so the
    /// latter is stripped when a provider is present.
    fn build_static_headers(&self, managed_credentials: bool) -> Result<HeaderMap, ConnectError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConnectError::Protocol(format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConnectError::Protocol(format!("invalid value for header {key:?}: {e}")))?;
            headers.insert(name, value);
        }
        if managed_credentials && headers.remove(AUTHORIZATION).is_some() {
            debug!(
                url = %self.url,
                "Managed credential supersedes the configured Authorization header"
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<Established, ConnectError> {
        info!(url = %self.url, legacy = self.legacy, "Connecting to streaming-http backend");

        let credentials = self.options.credentials.clone();
        let static_headers = self.build_static_headers(credentials.is_some())?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConnectError::Io(format!("failed to build http client: {e}")))?;

        let (event_tx, events) = mpsc::unbounded_channel();

        let client = Arc::new(HttpClient {
            http,
            url: self.url.clone(),
            static_headers,
            session: RwLock::new(if self.legacy {
                None
            } else {
                self.session_token.clone()
            }),
            legacy: self.legacy,
            credentials,
            reconnect: self.reconnect,
            next_id: AtomicU64::new(1),
            event_tx,
        });

        // Handshake with timeout. Endpoint failures surface with their HTTP
        // status so the caller can decide between session retry, legacy
        // fallback, and giving up.
        let handshake = async {
            let init_id = client.next_id.fetch_add(1, Ordering::Relaxed);
            client.post(&RpcRequest::initialize(init_id)).await?.into_result()?;
            client.post(&RpcRequest::initialized()).await?;
            Ok::<_, ConnectError>(())
        };
        match tokio::time::timeout(self.options.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.options.diagnostics.push(format!("handshake failed: {e}"));
                return Err(e);
            }
            Err(_) => {
                self.options
                    .diagnostics
                    .push(format!("handshake timed out ({:?})", self.options.connect_timeout));
                return Err(ConnectError::Timeout(self.options.connect_timeout));
            }
        }

        let session_token = client.session.read().clone();
        info!(
            url = %self.url,
            has_session = session_token.is_some(),
            "Streaming-http backend connected"
        );

        Ok(Established {
            client,
            kind: TransportKind::Http,
            session_token,
            events,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn description(&self) -> String {
        if self.legacy {
            format!("http-legacy:{}", self.url)
        } else {
            format!("http:{}", self.url)
        }
    }
}

/// Client half of a live streaming-http connection.
struct HttpClient {
    http: reqwest::Client,
    url: String,
    static_headers: HeaderMap,
    session: RwLock<Option<String>>,
    legacy: bool,
    credentials: Option<Arc<CredentialProvider>>,
    reconnect: ReconnectPolicy,
    next_id: AtomicU64,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl HttpClient {
    /// POST one message. Notifications (no id) resolve to an empty response
    /// on 202; requests resolve to the parsed response.
    async fn post(&self, request: &RpcRequest) -> Result<RpcResponse, ConnectError> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(request).await {
                Ok(response) => return Ok(response),
                // Endpoint answered; its status is meaningful, never retried
                // here.
                Err(e @ ConnectError::Endpoint { .. }) => return Err(e),
                Err(e) => {
                    if attempt >= self.reconnect.max_retries {
                        return Err(e);
                    }
                    let delay =
                        Duration::from_millis(self.reconnect.base_delay_ms << attempt.min(16));
                    warn!(url = %self.url, error = %e, retry_in = ?delay, "Transient transport failure");
                    let _ = self
                        .event_tx
                        .send(TransportEvent::Error(format!("transient failure: {e}")));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_once(&self, request: &RpcRequest) -> Result<RpcResponse, ConnectError> {
        let mut builder = self
            .http
            .post(&self.url)
            .headers(self.static_headers.clone())
            .json(request);

        if let Some(session) = self.session.read().clone() {
            builder = builder.header(SESSION_HEADER, session);
        }

        if let Some(provider) = &self.credentials {
            let token = provider.bearer_token().await?;
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ConnectError::Io(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectError::Endpoint {
                status: status.as_u16(),
                message,
            });
        }

        // Session tokens only exist in the modern variant.
        if !self.legacy {
            if let Some(session) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                *self.session.write() = Some(session.to_string());
            }
        }

        if status == StatusCode::ACCEPTED || request.id.is_none() {
            return Ok(RpcResponse {
                jsonrpc: None,
                id: None,
                result: Some(Value::Null),
                error: None,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            read_sse_response(response).await
        } else {
            response
                .json::<RpcResponse>()
                .await
                .map_err(|e| ConnectError::Protocol(format!("invalid response body: {e}")))
        }
    }
}

#[async_trait]
impl ProtocolClient for HttpClient {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ConnectError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);
        let response = match tokio::time::timeout(timeout, self.post(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Timeout(timeout)),
        };
        response.into_result()
    }

    async fn shutdown(&self) {
        // Best-effort session teardown.
        let session = self.session.write().take();
        if let Some(session) = session {
            let result = self
                .http
                .delete(&self.url)
                .headers(self.static_headers.clone())
                .header(SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = result {
                debug!(url = %self.url, "Session teardown request failed: {e}");
            }
        }
        let _ = self.event_tx.send(TransportEvent::Closed);
    }
}

/// Read the first JSON-RPC response event off a per-request event stream.
async fn read_sse_response(response: reqwest::Response) -> Result<RpcResponse, ConnectError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ConnectError::Io(format!("event stream failed: {e}")))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        // Events are blank-line separated; scan completed ones.
        while let Some(end) = buffer.find("\n\n") {
            let event: String = buffer[..end].to_string();
            buffer.drain(..end + 2);
            if let Some(response) = parse_sse_event(&event)? {
                return Ok(response);
            }
        }
    }
    Err(ConnectError::Protocol(
        "event stream ended without a response".into(),
    ))
}

/// Extract a JSON-RPC response from one event's data lines. Non-response
/// payloads (notifications, keepalives) yield `None`.
fn parse_sse_event(event: &str) -> Result<Option<RpcResponse>, ConnectError> {
    let data: String = event
        .lines()
        .filter_map(|line| {
            line.strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect::<Vec<_>>()
        .join("\n");
    if data.trim().is_empty() {
        return Ok(None);
    }
    let response: RpcResponse = serde_json::from_str(&data)
        .map_err(|e| ConnectError::Protocol(format!("invalid event payload: {e}")))?;
    if response.id.is_some() {
        Ok(Some(response))
    } else {
        Ok(None)
    }
}
