//! In-memory backend state.
//!
//! Each backend gets one `BackendInstance` holding its runtime status, its
//! diagnostic buffer, the cached tool catalog, and the live connection when
//! one exists. Instances live in the `ConnectionTable` and survive across
//! connection attempts; only deletion removes them.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use toolgate_core::{BackendStatus, DiagnosticBuffer, Tool, TransportKind};

use crate::protocol::ProtocolClient;

/// A live, handshaken connection plus its lifecycle watcher.
pub struct LiveConnection {
    pub client: Arc<dyn ProtocolClient>,
    pub kind: TransportKind,
    /// Task draining transport events into status/diagnostics.
    pub lifecycle: JoinHandle<()>,
}

/// Runtime state for one backend.
pub struct BackendInstance {
    pub name: String,
    status: RwLock<BackendStatus>,
    last_error: RwLock<Option<String>>,
    pub diagnostics: Arc<DiagnosticBuffer>,
    tools: RwLock<Vec<Tool>>,
    connection: AsyncRwLock<Option<LiveConnection>>,
    /// Serializes connection attempts for this backend.
    pub connect_lock: Mutex<()>,
}

impl BackendInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RwLock::new(BackendStatus::Disconnected),
            last_error: RwLock::new(None),
            diagnostics: Arc::new(DiagnosticBuffer::default()),
            tools: RwLock::new(Vec::new()),
            connection: AsyncRwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn mark_connecting(&self) {
        *self.status.write() = BackendStatus::Connecting;
        *self.last_error.write() = None;
    }

    pub fn mark_connected(&self) {
        *self.status.write() = BackendStatus::Connected;
        *self.last_error.write() = None;
    }

    pub fn mark_disconnected(&self) {
        *self.status.write() = BackendStatus::Disconnected;
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        *self.status.write() = BackendStatus::Error;
        *self.last_error.write() = Some(error.into());
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.read().clone()
    }

    pub fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.write() = tools;
    }

    pub fn clear_tools(&self) {
        self.tools.write().clear();
    }

    /// Install a new live connection, returning the previous one for
    /// teardown.
    pub async fn install_connection(&self, connection: LiveConnection) -> Option<LiveConnection> {
        self.connection.write().await.replace(connection)
    }

    pub async fn take_connection(&self) -> Option<LiveConnection> {
        self.connection.write().await.take()
    }

    /// Run `f` against the live client, if any.
    pub async fn client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.client))
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }
}

/// Shared table of backend instances, keyed by backend name.
#[derive(Default)]
pub struct ConnectionTable {
    instances: DashMap<String, Arc<BackendInstance>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the instance for a backend.
    pub fn instance(&self, name: &str) -> Arc<BackendInstance> {
        self.instances
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(backend = %name, "Creating backend instance");
                Arc::new(BackendInstance::new(name))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendInstance>> {
        self.instances.get(name).map(|e| e.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<BackendInstance>> {
        self.instances.remove(name).map(|(_, v)| v)
    }

    pub fn all(&self) -> Vec<Arc<BackendInstance>> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }
}
