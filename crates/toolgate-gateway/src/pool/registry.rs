//! Backend registry - configuration CRUD.
//!
//! Every mutation validates before persisting and then re-derives the right
//! supervisor action (connect, teardown, or restart) without blocking the
//! caller. Persisted configuration is the source of truth; in-memory state
//! is reconciled on every mutation, never trusted.

use std::sync::Arc;

use tracing::{info, warn};

use toolgate_core::{
    BackendConfig, BackendRepository, BackendStatus, BackendUpdate, ConfigError,
    CredentialRecord, CredentialRepository, RESERVED_BACKENDS,
};

use super::supervisor::ConnectionSupervisor;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("backend {0:?} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A backend plus its runtime status, for read surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendView {
    #[serde(flatten)]
    pub config: BackendConfig,
    pub status: BackendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct BackendRegistry {
    backends: Arc<dyn BackendRepository>,
    credentials: Arc<dyn CredentialRepository>,
    supervisor: Arc<ConnectionSupervisor>,
}

impl BackendRegistry {
    pub fn new(
        backends: Arc<dyn BackendRepository>,
        credentials: Arc<dyn CredentialRepository>,
        supervisor: Arc<ConnectionSupervisor>,
    ) -> Self {
        Self {
            backends,
            credentials,
            supervisor,
        }
    }

    fn reject_reserved(name: &str) -> Result<(), RegistryError> {
        if RESERVED_BACKENDS.contains(&name) {
            return Err(ConfigError::ReservedName(name.to_string()).into());
        }
        Ok(())
    }

    /// Kick off a connect without blocking the caller.
    fn spawn_connect(&self, name: String) {
        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            if let Err(e) = supervisor.connect(&name).await {
                warn!(backend = %name, "Background connect failed: {e}");
            }
        });
    }

    /// Kick off a teardown-and-reconnect without blocking the caller. Waits
    /// out any in-flight attempt, so the reconnect always runs under the
    /// configuration persisted by the mutation that spawned it.
    fn spawn_restart(&self, name: String) {
        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            if let Err(e) = supervisor.restart(&name).await {
                warn!(backend = %name, "Background restart failed: {e}");
            }
        });
    }

    fn view(&self, mut config: BackendConfig) -> BackendView {
        config.normalize_secret_names();
        let instance = self.supervisor.table().get(&config.name);
        let (status, last_error) = match instance {
            Some(i) => (i.status(), i.last_error()),
            None => (BackendStatus::Disconnected, None),
        };
        BackendView {
            config,
            status,
            last_error,
        }
    }

    pub async fn list(&self) -> Result<Vec<BackendView>, RegistryError> {
        let configs = self.backends.list().await?;
        Ok(configs.into_iter().map(|c| self.view(c)).collect())
    }

    pub async fn get(&self, name: &str) -> Result<BackendView, RegistryError> {
        let config = self
            .backends
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(self.view(config))
    }

    /// Register a new backend and start connecting it.
    pub async fn add(&self, mut config: BackendConfig) -> Result<(), RegistryError> {
        config.validate()?;
        config.normalize_secret_names();

        if self.backends.get(&config.name).await?.is_some() {
            return Err(ConfigError::DuplicateName(config.name.clone()).into());
        }

        self.backends.upsert(&config).await?;
        info!(backend = %config.name, transport = %config.transport, "Backend added");

        // Always registers the in-memory instance; disabled backends park
        // at `disconnected` without an attempt.
        self.spawn_connect(config.name);
        Ok(())
    }

    /// Apply a partial update. Validation runs against the merged
    /// configuration. An enabled-only change is a plain toggle; anything
    /// else restarts the connection under the new configuration.
    pub async fn update(&self, name: &str, update: BackendUpdate) -> Result<(), RegistryError> {
        Self::reject_reserved(name)?;

        let existing = self
            .backends
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if update.is_enabled_only() {
            return match update.enabled {
                Some(true) => self.enable(name).await,
                _ => self.disable(name).await,
            };
        }

        let mut merged = existing.merged(&update);
        merged.validate()?;
        merged.normalize_secret_names();

        self.backends.upsert(&merged).await?;
        info!(backend = %name, "Backend updated");

        // The restart tears the old connection down before the new
        // configuration connects, even when an attempt is still in flight.
        if merged.enabled {
            self.spawn_restart(merged.name);
        } else {
            self.supervisor.disconnect(name).await;
        }
        Ok(())
    }

    /// Idempotent enable + connect.
    pub async fn enable(&self, name: &str) -> Result<(), RegistryError> {
        Self::reject_reserved(name)?;
        let existing = self
            .backends
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if existing.enabled {
            return Ok(());
        }
        self.backends.set_enabled(name, true).await?;
        info!(backend = %name, "Backend enabled");
        self.spawn_restart(name.to_string());
        Ok(())
    }

    /// Idempotent disable + teardown.
    pub async fn disable(&self, name: &str) -> Result<(), RegistryError> {
        Self::reject_reserved(name)?;
        let existing = self
            .backends
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if existing.enabled {
            self.backends.set_enabled(name, false).await?;
        }
        self.supervisor.disconnect(name).await;
        info!(backend = %name, "Backend disabled");
        Ok(())
    }

    /// Tear down and remove a backend and its credential record.
    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        Self::reject_reserved(name)?;
        if self.backends.get(name).await?.is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.supervisor.disconnect(name).await;
        self.supervisor.table().remove(name);
        self.backends.delete(name).await?;
        self.credentials.delete(name).await?;
        info!(backend = %name, "Backend deleted");
        Ok(())
    }

    /// Push a credential obtained from an out-of-band authorization flow,
    /// then restart the backend so the new credential takes effect.
    pub async fn put_credentials(&self, record: CredentialRecord) -> Result<(), RegistryError> {
        Self::reject_reserved(&record.backend)?;
        let config = self
            .backends
            .get(&record.backend)
            .await?
            .ok_or_else(|| RegistryError::NotFound(record.backend.clone()))?;

        self.credentials.save(&record).await?;
        info!(backend = %record.backend, "Credential updated");

        if config.enabled {
            self.spawn_restart(record.backend);
        }
        Ok(())
    }
}
