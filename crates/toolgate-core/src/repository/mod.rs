//! Repository and collaborator traits.
//!
//! These traits define the interface for data storage and host-provided
//! services without specifying the implementation (SQLite, in-memory, etc.)

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{BackendConfig, CredentialRecord};

/// Result type for repository operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Backend configuration repository
#[async_trait]
pub trait BackendRepository: Send + Sync {
    /// Get all backends
    async fn list(&self) -> RepoResult<Vec<BackendConfig>>;

    /// Get enabled backends only
    async fn list_enabled(&self) -> RepoResult<Vec<BackendConfig>>;

    /// Get a backend by name
    async fn get(&self, name: &str) -> RepoResult<Option<BackendConfig>>;

    /// Create or replace a backend
    async fn upsert(&self, config: &BackendConfig) -> RepoResult<()>;

    /// Persist the enabled flag only
    async fn set_enabled(&self, name: &str, enabled: bool) -> RepoResult<()>;

    /// Persist the negotiated session token (or clear it with `None`)
    async fn set_session_token(&self, name: &str, token: Option<&str>) -> RepoResult<()>;

    /// Delete a backend
    async fn delete(&self, name: &str) -> RepoResult<()>;
}

/// Credential repository. One record per backend.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get(&self, backend: &str) -> RepoResult<Option<CredentialRecord>>;

    async fn save(&self, record: &CredentialRecord) -> RepoResult<()>;

    async fn delete(&self, backend: &str) -> RepoResult<()>;
}

/// Secret material scoped to a calling workload, forwarded to backends as
/// environment-style key/value pairs.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// All secrets visible to `caller`.
    async fn secrets_for(&self, caller: &str) -> RepoResult<HashMap<String, String>>;

    async fn put(&self, caller: &str, key: &str, value: &str) -> RepoResult<()>;

    async fn delete(&self, caller: &str, key: &str) -> RepoResult<()>;
}

/// Host hook for repairing a broken local-process backend.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Attempt to (re)install the package backing `config`. Returns true
    /// when a retry of the connection is worth making.
    async fn attempt_reinstall(&self, config: &BackendConfig) -> bool;
}

/// Installer that never repairs anything. Used where no package manager is
/// wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstaller;

#[async_trait]
impl PackageInstaller for NoopInstaller {
    async fn attempt_reinstall(&self, _config: &BackendConfig) -> bool {
        false
    }
}
