//! Transport abstraction for backend connections.
//!
//! Provides a Transport trait and factory for creating different transport
//! types. New transports can be added without modifying the supervisor.

mod http;
mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use toolgate_core::{ConnectError, DiagnosticBuffer, TransportConfig, TransportKind};

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::pool::CredentialProvider;
use crate::protocol::{ProtocolClient, TransportEvent};

/// A live connection handed back by a transport.
pub struct Established {
    pub client: Arc<dyn ProtocolClient>,
    pub kind: TransportKind,
    /// Session token negotiated during the handshake, if the endpoint issued
    /// one. Persisted by the supervisor for reuse across restarts.
    pub session_token: Option<String>,
    /// Out-of-band lifecycle events (errors, closure).
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Shared inputs every transport needs.
#[derive(Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// Attempt-scoped diagnostic sink (stderr lines, transport errors).
    pub diagnostics: Arc<DiagnosticBuffer>,
    /// Managed credential source for streaming-http endpoints. `None` when
    /// the backend has no stored credential.
    pub credentials: Option<Arc<CredentialProvider>>,
}

/// Transport trait for backend connections.
///
/// Each implementation handles the specifics of establishing a session with
/// a backend over a particular protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to connect and complete the protocol handshake.
    async fn connect(&self) -> Result<Established, ConnectError>;

    /// Get the transport kind
    fn kind(&self) -> TransportKind;

    /// Get a description for logging
    fn description(&self) -> String;
}

/// Factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport from a resolved configuration.
    pub fn create(config: &TransportConfig, options: TransportOptions) -> Box<dyn Transport> {
        match config {
            TransportConfig::Stdio { command, args, env } => Box::new(StdioTransport::new(
                command.clone(),
                args.clone(),
                env.clone(),
                options,
            )),
            TransportConfig::Http {
                url,
                headers,
                session_token,
                reconnect,
            } => Box::new(HttpTransport::new(
                url.clone(),
                headers.clone(),
                session_token.clone(),
                *reconnect,
                options,
            )),
        }
    }

    /// Create the legacy single-direction variant of a streaming-http
    /// transport. Only meaningful for HTTP configs; stdio configs fall back
    /// to the regular transport.
    pub fn create_legacy(config: &TransportConfig, options: TransportOptions) -> Box<dyn Transport> {
        match config {
            TransportConfig::Http {
                url,
                headers,
                reconnect,
                ..
            } => Box::new(
                // Legacy endpoints predate session negotiation; never send a
                // stored token.
                HttpTransport::new(url.clone(), headers.clone(), None, *reconnect, options)
                    .legacy(),
            ),
            stdio => Self::create(stdio, options),
        }
    }
}
