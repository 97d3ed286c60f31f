//! Error taxonomy for the gateway.
//!
//! Four families, matching how failures propagate:
//! - `ConfigError` - rejected synchronously before persistence
//! - `ConnectError` - handled by the supervisor's fallback ladder
//! - `CredentialError` - distinguishable from transport errors so callers
//!   can decide whether to re-run an out-of-band authorization flow
//! - `InvokeError` - returned to the invocation caller, never thrown past it

use std::time::Duration;

use thiserror::Error;

use crate::domain::BackendStatus;

/// Configuration errors, rejected before any persistence or connection attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backend name must not be empty")]
    EmptyName,

    #[error("backend name {0:?} is reserved for the host process")]
    ReservedName(String),

    #[error("backend {0:?} already exists")]
    DuplicateName(String),

    #[error(
        "backend {0:?} mixes local-process fields (command/args/env) with \
         streaming-http fields (url/headers/session/reconnect)"
    )]
    MixedTransportFields(String),

    #[error("local-process backend {0:?} is missing a command")]
    MissingCommand(String),

    #[error("streaming-http backend {0:?} is missing a url")]
    MissingUrl(String),

    #[error("streaming-http backend {name:?} has an invalid url: {reason}")]
    InvalidUrl { name: String, reason: String },
}

/// Connection-level errors. The supervisor inspects `status()` to drive the
/// fallback ladder; everything else is terminal for the attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The endpoint answered with a non-success HTTP status.
    #[error("endpoint returned HTTP {status}: {message}")]
    Endpoint { status: u16, message: String },

    /// The remote side returned a JSON-RPC error object.
    #[error("backend error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Malformed or unexpected protocol traffic.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport is gone (child exited, pipe closed, channel dropped).
    #[error("transport closed")]
    Closed,

    #[error("i/o failure: {0}")]
    Io(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ConnectError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectError::Endpoint { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Credential errors, surfaced as explicit failures distinct from transport
/// errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// This gateway never drives an interactive browser flow; callers must
    /// re-run authorization out of band.
    #[error(
        "reauthorization required for backend {backend:?}: complete the \
         authorization flow at {authorize_url} and push the new credential"
    )]
    ReauthorizationRequired {
        backend: String,
        authorize_url: String,
    },

    #[error(
        "no proof-of-possession verifier stored for backend {backend:?}; \
         refresh flows do not need one, anything else requires reauthorization"
    )]
    MissingVerifier { backend: String },

    #[error("token refresh failed for backend {backend:?}: {reason}")]
    RefreshFailed { backend: String, reason: String },

    #[error("credential store failure: {0}")]
    Store(String),
}

/// Invocation errors, returned as typed failures to the router's caller.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend {0:?} not found")]
    NotFound(String),

    #[error("backend {0:?} is not connected (status: {1})")]
    NotConnected(String, BackendStatus),

    #[error("secret store failure: {0}")]
    Secrets(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Call(#[from] ConnectError),
}
