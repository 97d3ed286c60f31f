//! Connection supervisor - the connect state machine.
//!
//! One attempt at a time per backend. An attempt walks a fallback ladder:
//!
//! 1. A stored session token rejected with 404 is cleared (in memory and in
//!    storage) and the connect is retried once without it.
//! 2. A handshake refused with a status from the configured fallback set is
//!    retried once over the legacy single-direction transport.
//! 3. Anything else is terminal. Local-process backends get one reinstall
//!    attempt through the package installer; if that does not produce a
//!    working connection the backend is persisted disabled. Remote backends
//!    are never auto-disabled - their failures are usually transient or
//!    credential-shaped.

use std::sync::Arc;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use toolgate_core::{
    BackendConfig, BackendRepository, ConnectError, CredentialRepository, PackageInstaller,
    TransportKind,
};

use super::catalog::CatalogFetcher;
use super::credentials::CredentialProvider;
use super::instance::{BackendInstance, ConnectionTable, LiveConnection};
use crate::protocol::TransportEvent;
use crate::transport::{Established, TransportFactory, TransportOptions};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub connect_timeout: Duration,
    /// Handshake statuses that trigger the legacy transport fallback.
    pub legacy_fallback_statuses: Vec<u16>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            legacy_fallback_statuses: vec![400, 404, 405],
        }
    }
}

pub struct ConnectionSupervisor {
    table: Arc<ConnectionTable>,
    backends: Arc<dyn BackendRepository>,
    credentials: Arc<dyn CredentialRepository>,
    installer: Arc<dyn PackageInstaller>,
    catalog: Arc<CatalogFetcher>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    pub fn new(
        table: Arc<ConnectionTable>,
        backends: Arc<dyn BackendRepository>,
        credentials: Arc<dyn CredentialRepository>,
        installer: Arc<dyn PackageInstaller>,
        catalog: Arc<CatalogFetcher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            table,
            backends,
            credentials,
            installer,
            catalog,
            config,
        }
    }

    pub fn table(&self) -> Arc<ConnectionTable> {
        Arc::clone(&self.table)
    }

    /// Connect a backend by name. No-op when the backend is disabled,
    /// already connected, or an attempt is already in flight.
    pub async fn connect(self: &Arc<Self>, name: &str) -> anyhow::Result<()> {
        let Some(mut config) = self.backends.get(name).await? else {
            anyhow::bail!("backend {name:?} not found");
        };
        config.normalize_secret_names();

        // A disabled backend keeps its instance so status surfaces read
        // `disconnected`, but no attempt ever starts.
        let instance = self.table.instance(name);
        if !config.enabled {
            debug!(backend = %name, "Backend disabled; skipping connect");
            return Ok(());
        }

        let Ok(_guard) = instance.connect_lock.try_lock() else {
            debug!(backend = %name, "Connect already in flight");
            return Ok(());
        };

        if instance.is_connected().await {
            debug!(backend = %name, "Already connected");
            return Ok(());
        }

        self.attempt(&config, &instance).await
    }

    /// Tear down any current connection and reconnect under the freshly
    /// persisted configuration. Unlike `connect`, waits out an in-flight
    /// attempt instead of deduplicating against it, so a configuration
    /// change can never lose the race to an attempt started under the old
    /// configuration.
    pub async fn restart(self: &Arc<Self>, name: &str) -> anyhow::Result<()> {
        let Some(mut config) = self.backends.get(name).await? else {
            anyhow::bail!("backend {name:?} not found");
        };
        config.normalize_secret_names();

        let instance = self.table.instance(name);
        let _guard = instance.connect_lock.lock().await;

        if let Some(connection) = instance.take_connection().await {
            teardown(connection).await;
        }
        instance.clear_tools();

        if !config.enabled {
            instance.mark_disconnected();
            return Ok(());
        }
        self.attempt(&config, &instance).await
    }

    /// One full connection attempt. The caller holds the connect lock.
    async fn attempt(
        self: &Arc<Self>,
        config: &BackendConfig,
        instance: &Arc<BackendInstance>,
    ) -> anyhow::Result<()> {
        // Attempt begins: fresh status, fresh diagnostics.
        instance.mark_connecting();
        instance.diagnostics.clear();
        info!(backend = %config.name, transport = %config.transport, "Connecting backend");

        if let Err(e) = config.validate() {
            instance.mark_failed(e.to_string());
            return Err(e.into());
        }

        let credentials = match self.credentials.get(&config.name).await? {
            Some(record) => Some(Arc::new(CredentialProvider::new(
                record,
                Arc::clone(&self.credentials),
            ))),
            None => None,
        };

        let options = TransportOptions {
            connect_timeout: self.config.connect_timeout,
            diagnostics: Arc::clone(&instance.diagnostics),
            credentials,
        };

        let mut reinstall_tried = false;
        loop {
            match self.establish(config, options.clone()).await {
                Ok(established) => {
                    return self.finish_connect(config, instance, established).await;
                }
                Err(err) => {
                    if !reinstall_tried && config.transport == TransportKind::Stdio {
                        reinstall_tried = true;
                        warn!(backend = %config.name, error = %err, "Connect failed; attempting package reinstall");
                        if self.installer.attempt_reinstall(config).await {
                            info!(backend = %config.name, "Reinstall reported success; retrying connect");
                            continue;
                        }
                    }
                    return self.finish_failed(config, instance, err).await;
                }
            }
        }
    }

    /// Walk the fallback ladder for one transport-level attempt.
    async fn establish(
        &self,
        config: &BackendConfig,
        options: TransportOptions,
    ) -> Result<Established, ConnectError> {
        let mut resolved = config.resolve();
        let transport = TransportFactory::create(&resolved, options.clone());
        let mut last_error = match transport.connect().await {
            Ok(established) => return Ok(established),
            Err(e) => e,
        };

        // Rung 1: stored session token rejected as unknown. Clear it
        // everywhere and retry once without it.
        if resolved.session_token().is_some() && last_error.status() == Some(404) {
            info!(
                backend = %config.name,
                "Stored session rejected (404); clearing it and retrying"
            );
            if let Err(e) = self.backends.set_session_token(&config.name, None).await {
                error!(backend = %config.name, "Failed to clear persisted session token: {e}");
            }
            resolved.clear_session_token();
            let transport = TransportFactory::create(&resolved, options.clone());
            match transport.connect().await {
                Ok(established) => return Ok(established),
                Err(e) => last_error = e,
            }
        }

        // Rung 2: endpoint refuses the modern handshake outright. Statuses
        // in the fallback set usually mean a legacy-only endpoint.
        if resolved.is_http() {
            if let Some(status) = last_error.status() {
                if self.config.legacy_fallback_statuses.contains(&status) {
                    warn!(
                        backend = %config.name,
                        status,
                        "Handshake refused; falling back to legacy transport"
                    );
                    let transport = TransportFactory::create_legacy(&resolved, options);
                    match transport.connect().await {
                        Ok(established) => return Ok(established),
                        Err(e) => last_error = e,
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn finish_connect(
        self: &Arc<Self>,
        config: &BackendConfig,
        instance: &Arc<BackendInstance>,
        established: Established,
    ) -> anyhow::Result<()> {
        // The backend may have been disabled while the handshake ran.
        let still_enabled = self
            .backends
            .get(&config.name)
            .await?
            .map(|c| c.enabled)
            .unwrap_or(false);
        if !still_enabled {
            info!(backend = %config.name, "Backend disabled mid-connect; tearing down");
            established.client.shutdown().await;
            instance.mark_disconnected();
            return Ok(());
        }

        // Persist a newly negotiated session token for reuse across
        // restarts.
        if established.session_token != config.session_token {
            if let Err(e) = self
                .backends
                .set_session_token(&config.name, established.session_token.as_deref())
                .await
            {
                error!(backend = %config.name, "Failed to persist session token: {e}");
            }
        }

        let lifecycle = spawn_lifecycle_watcher(Arc::clone(instance), established.events);
        let previous = instance
            .install_connection(LiveConnection {
                client: established.client,
                kind: established.kind,
                lifecycle,
            })
            .await;
        if let Some(previous) = previous {
            teardown(previous).await;
        }

        instance.mark_connected();
        info!(backend = %config.name, kind = %established.kind, "Backend connected");

        // Catalog discovery runs in the background; its retry budget spans
        // minutes.
        let supervisor = Arc::clone(self);
        let instance = Arc::clone(instance);
        let timeout_override = config.request_timeout_secs;
        tokio::spawn(async move {
            let _ = supervisor.catalog.fetch(instance, timeout_override).await;
        });

        Ok(())
    }

    async fn finish_failed(
        &self,
        config: &BackendConfig,
        instance: &Arc<BackendInstance>,
        err: ConnectError,
    ) -> anyhow::Result<()> {
        let diagnostics = instance.diagnostics.snapshot();
        error!(
            backend = %config.name,
            error = %err,
            diagnostic_lines = diagnostics.len(),
            "Backend connection failed terminally"
        );
        for line in &diagnostics {
            debug!(backend = %config.name, "diagnostic: {line}");
        }

        let message = if config.transport == TransportKind::Stdio {
            let command = config.command.as_deref().unwrap_or("<unset>");
            format!("{err}; reinstall {command} and re-enable the backend")
        } else {
            err.to_string()
        };
        instance.mark_failed(message);

        // Only local-process backends are parked; a remote endpoint may
        // recover without any local action.
        if config.transport == TransportKind::Stdio {
            if let Err(e) = self.backends.set_enabled(&config.name, false).await {
                error!(backend = %config.name, "Failed to persist disabled flag: {e}");
            }
        }

        Err(err.into())
    }

    /// Tear down a backend's connection, if any. Status becomes
    /// disconnected; the cached catalog is dropped.
    pub async fn disconnect(&self, name: &str) {
        let Some(instance) = self.table.get(name) else {
            return;
        };
        if let Some(connection) = instance.take_connection().await {
            teardown(connection).await;
        }
        instance.clear_tools();
        instance.mark_disconnected();
        info!(backend = %name, "Backend disconnected");
    }

    /// Connect every enabled backend. Failures are logged, never propagated;
    /// one broken backend must not hold up the rest.
    pub async fn replay_startup(self: &Arc<Self>) -> anyhow::Result<()> {
        let configs = self.backends.list_enabled().await?;
        info!(count = configs.len(), "Replaying connections for enabled backends");
        for config in configs {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = supervisor.connect(&config.name).await {
                    warn!(backend = %config.name, "Startup connect failed: {e}");
                }
            });
        }
        Ok(())
    }
}

/// Drain transport events into instance state until the transport closes.
fn spawn_lifecycle_watcher(
    instance: Arc<BackendInstance>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Error(message) => {
                    warn!(backend = %instance.name, "Transport error: {message}");
                    instance.diagnostics.push(message);
                }
                TransportEvent::Closed => {
                    let diagnostics = instance.diagnostics.drain();
                    info!(
                        backend = %instance.name,
                        diagnostic_lines = diagnostics.len(),
                        "Transport closed"
                    );
                    for line in &diagnostics {
                        debug!(backend = %instance.name, "diagnostic: {line}");
                    }
                    instance.mark_disconnected();
                    instance.clear_tools();
                    break;
                }
            }
        }
    })
}

async fn teardown(connection: LiveConnection) {
    // Stop the watcher first so the shutdown does not get reported as an
    // unexpected closure.
    connection.lifecycle.abort();
    connection.client.shutdown().await;
}
