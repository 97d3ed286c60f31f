//! Gateway binary: wire storage, connection pool, and HTTP surface together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use toolgate_core::NoopInstaller;
use toolgate_gateway::{
    build_router, AppState, BackendRegistry, CatalogConfig, CatalogFetcher, ConnectionSupervisor,
    ConnectionTable, InvocationRouter, SupervisorConfig,
};
use toolgate_storage::{
    load_or_create_master_key, Database, FieldCipher, SqliteBackendRepository,
    SqliteCredentialRepository, SqliteSecretStore, DATABASE_FILE, MASTER_KEY_FILE,
};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7777";

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TOOLGATE_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    toolgate_storage::default_data_dir().context("Could not determine a data directory")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = data_dir()?;
    let db_path = data_dir.join(DATABASE_FILE);
    let key_path = data_dir.join(MASTER_KEY_FILE);
    info!(path = %db_path.display(), "Opening database");

    let master_key = load_or_create_master_key(&key_path)?;
    let cipher = Arc::new(FieldCipher::new(&master_key)?);
    let db = Arc::new(Mutex::new(Database::open(&db_path)?));

    let backends: Arc<dyn toolgate_core::BackendRepository> =
        Arc::new(SqliteBackendRepository::new(Arc::clone(&db)));
    let credentials: Arc<dyn toolgate_core::CredentialRepository> = Arc::new(
        SqliteCredentialRepository::new(Arc::clone(&db), Arc::clone(&cipher)),
    );
    let secrets: Arc<dyn toolgate_core::SecretStore> =
        Arc::new(SqliteSecretStore::new(Arc::clone(&db), cipher));

    let table = Arc::new(ConnectionTable::new());
    let catalog = Arc::new(CatalogFetcher::new(
        Arc::clone(&backends),
        CatalogConfig::default(),
    ));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&table),
        Arc::clone(&backends),
        Arc::clone(&credentials),
        Arc::new(NoopInstaller),
        catalog,
        SupervisorConfig::default(),
    ));
    let registry = Arc::new(BackendRegistry::new(
        Arc::clone(&backends),
        credentials,
        Arc::clone(&supervisor),
    ));
    let router = Arc::new(InvocationRouter::new(table, backends, secrets));

    supervisor.replay_startup().await?;

    let addr = std::env::var("TOOLGATE_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Gateway listening");

    let app = build_router(AppState { registry, router });
    axum::serve(listener, app).await?;
    Ok(())
}
