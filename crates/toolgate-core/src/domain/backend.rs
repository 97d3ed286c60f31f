//! Backend configuration - the unit of management.
//!
//! `BackendConfig` is the persisted/wire form: a flat struct carrying the
//! fields of both transport variants so that configurations mixing the two
//! can be detected and rejected before persistence. `TransportConfig` is the
//! resolved runtime form handed to the transport factory - exactly one
//! variant, no invalid states.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backend names supplied by the host process itself. Registry mutations on
/// these are rejected outright.
pub const RESERVED_BACKENDS: &[&str] = &["toolgate", "system"];

/// Transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// Reconnection policy for streaming-http transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Retries per request on transient transport failures.
    pub max_retries: u32,
    /// Base delay, doubled per retry.
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

/// Runtime connection status. Never persisted - the persisted `enabled` flag
/// and this in-memory status are separate concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Disconnected => write!(f, "disconnected"),
            BackendStatus::Connecting => write!(f, "connecting"),
            BackendStatus::Connected => write!(f, "connected"),
            BackendStatus::Error => write!(f, "error"),
        }
    }
}

/// A tool exposed by a backend (cached catalog entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

/// Persisted backend configuration (wire form).
///
/// Fields of both transport variants are present so validation can reject a
/// record that populates both, regardless of the declared `transport` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique name, stable across restarts.
    pub name: String,

    pub transport: TransportKind,

    // Local-process fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    // Streaming-http fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,

    /// Secret names this backend may receive. Empty means "legacy: receive
    /// everything" (kept for backward compatibility only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_names: Vec<String>,

    /// Legacy singular form; normalized into `secret_names` at every read
    /// path and never written back.
    #[serde(default, skip_serializing)]
    pub secret_name: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-request timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    /// Minimal local-process config.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            session_token: None,
            reconnect: None,
            secret_names: Vec::new(),
            secret_name: None,
            enabled: true,
            request_timeout_secs: None,
        }
    }

    /// Minimal streaming-http config.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
            session_token: None,
            reconnect: None,
            secret_names: Vec::new(),
            secret_name: None,
            enabled: true,
            request_timeout_secs: None,
        }
    }

    fn has_stdio_fields(&self) -> bool {
        self.command.is_some() || !self.args.is_empty() || !self.env.is_empty()
    }

    fn has_http_fields(&self) -> bool {
        self.url.is_some()
            || !self.headers.is_empty()
            || self.session_token.is_some()
            || self.reconnect.is_some()
    }

    /// Reject configurations that mix fields of both transport variants or
    /// miss the required field of the declared one. Runs on every
    /// create/update, before persistence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if RESERVED_BACKENDS.contains(&self.name.as_str()) {
            return Err(ConfigError::ReservedName(self.name.clone()));
        }
        if self.has_stdio_fields() && self.has_http_fields() {
            return Err(ConfigError::MixedTransportFields(self.name.clone()));
        }
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(ConfigError::MissingCommand(self.name.clone()));
                }
            }
            TransportKind::Http => {
                let url = self
                    .url
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingUrl(self.name.clone()))?;
                url::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Fold the legacy singular `secret_name` into the list form. Returns
    /// true when a change was made and a write-through is due.
    pub fn normalize_secret_names(&mut self) -> bool {
        match self.secret_name.take() {
            Some(name) if !self.secret_names.contains(&name) => {
                self.secret_names.push(name);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Resolve into the runtime transport form. Callers must `validate`
    /// first; an invalid config resolves to whatever the tag claims.
    pub fn resolve(&self) -> TransportConfig {
        match self.transport {
            TransportKind::Stdio => TransportConfig::Stdio {
                command: self.command.clone().unwrap_or_default(),
                args: self.args.clone(),
                env: self.env.clone(),
            },
            TransportKind::Http => TransportConfig::Http {
                url: self.url.clone().unwrap_or_default(),
                headers: self.headers.clone(),
                session_token: self.session_token.clone(),
                reconnect: self.reconnect.unwrap_or_default(),
            },
        }
    }

    /// Apply a partial update, returning the merged config.
    pub fn merged(&self, update: &BackendUpdate) -> Self {
        let mut next = self.clone();
        if let Some(transport) = update.transport {
            next.transport = transport;
        }
        if let Some(command) = &update.command {
            next.command = command.clone();
        }
        if let Some(args) = &update.args {
            next.args = args.clone();
        }
        if let Some(env) = &update.env {
            next.env = env.clone();
        }
        if let Some(url) = &update.url {
            next.url = url.clone();
        }
        if let Some(headers) = &update.headers {
            next.headers = headers.clone();
        }
        if let Some(session_token) = &update.session_token {
            next.session_token = session_token.clone();
        }
        if let Some(reconnect) = &update.reconnect {
            next.reconnect = *reconnect;
        }
        if let Some(secret_names) = &update.secret_names {
            next.secret_names = secret_names.clone();
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(timeout) = &update.request_timeout_secs {
            next.request_timeout_secs = *timeout;
        }
        next
    }
}

/// Distinguishes an absent field (outer `None`, leave untouched) from an
/// explicit `null` (inner `None`, clear the field).
fn clearable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update for a backend. `None` leaves a field untouched; inner
/// `None` on clearable fields clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendUpdate {
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default, deserialize_with = "clearable")]
    pub command: Option<Option<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, deserialize_with = "clearable")]
    pub url: Option<Option<String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, deserialize_with = "clearable")]
    pub session_token: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable")]
    pub reconnect: Option<Option<ReconnectPolicy>>,
    #[serde(default)]
    pub secret_names: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "clearable")]
    pub request_timeout_secs: Option<Option<u64>>,
}

impl BackendUpdate {
    /// True when the update touches nothing but the enabled flag.
    pub fn is_enabled_only(&self) -> bool {
        self.enabled.is_some()
            && self.transport.is_none()
            && self.command.is_none()
            && self.args.is_none()
            && self.env.is_none()
            && self.url.is_none()
            && self.headers.is_none()
            && self.session_token.is_none()
            && self.reconnect.is_none()
            && self.secret_names.is_none()
            && self.request_timeout_secs.is_none()
    }
}

/// Resolved transport configuration ready for connection. Exactly one
/// variant - the runtime representation, distinct from `BackendConfig` which
/// is the persisted/wire format.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
        session_token: Option<String>,
        reconnect: ReconnectPolicy,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Http { .. } => TransportKind::Http,
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, TransportConfig::Http { .. })
    }

    pub fn session_token(&self) -> Option<&str> {
        match self {
            TransportConfig::Http { session_token, .. } => session_token.as_deref(),
            TransportConfig::Stdio { .. } => None,
        }
    }

    /// Drop the session token (used by the session-expiry retry rung).
    pub fn clear_session_token(&mut self) {
        if let TransportConfig::Http { session_token, .. } = self {
            *session_token = None;
        }
    }
}
