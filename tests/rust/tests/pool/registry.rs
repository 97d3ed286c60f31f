//! Registry CRUD: validation, reserved names, and lifecycle delegation.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use tests::endpoint::rpc_result;
use tests::{
    credential_fixture, wait_for, BackendConfig, BackendStatus, BackendUpdate, MockBackendRepo,
    MockCredentialRepo, MockInstaller,
};
use toolgate_core::{BackendRepository, ConfigError, CredentialRepository};
use toolgate_gateway::{
    BackendRegistry, CatalogConfig, CatalogFetcher, ConnectionSupervisor, ConnectionTable,
    RegistryError, SupervisorConfig,
};

struct Harness {
    registry: BackendRegistry,
    supervisor: Arc<ConnectionSupervisor>,
    repo: Arc<MockBackendRepo>,
    credentials: Arc<MockCredentialRepo>,
}

fn harness() -> Harness {
    let repo = Arc::new(MockBackendRepo::new());
    let credentials = Arc::new(MockCredentialRepo::new());
    let backends: Arc<dyn BackendRepository> = Arc::clone(&repo) as _;
    let creds: Arc<dyn CredentialRepository> = Arc::clone(&credentials) as _;
    let catalog = Arc::new(CatalogFetcher::new(
        Arc::clone(&backends),
        CatalogConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            ..CatalogConfig::default()
        },
    ));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(ConnectionTable::new()),
        Arc::clone(&backends),
        Arc::clone(&creds),
        Arc::new(MockInstaller::reporting(false)),
        catalog,
        SupervisorConfig::default(),
    ));
    let registry = BackendRegistry::new(backends, creds, Arc::clone(&supervisor));
    Harness {
        registry,
        supervisor,
        repo,
        credentials,
    }
}

/// A valid config that never triggers a background connect.
fn parked(name: &str) -> BackendConfig {
    let mut config = BackendConfig::http(name, "https://example.invalid/rpc");
    config.enabled = false;
    config
}

#[tokio::test]
async fn add_persists_and_lists() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();

    let listed = h.registry.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].config.name, "docs");
    assert_eq!(listed[0].status, BackendStatus::Disconnected);

    let view = h.registry.get("docs").await.unwrap();
    assert!(!view.config.enabled);
}

#[tokio::test]
async fn add_rejects_duplicates() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();
    let err = h.registry.add(parked("docs")).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Config(ConfigError::DuplicateName(_))
    ));
}

#[tokio::test]
async fn reserved_names_are_rejected_everywhere() {
    let h = harness();
    assert!(matches!(
        h.registry.add(parked("toolgate")).await.unwrap_err(),
        RegistryError::Config(ConfigError::ReservedName(_))
    ));
    assert!(matches!(
        h.registry.delete("system").await.unwrap_err(),
        RegistryError::Config(ConfigError::ReservedName(_))
    ));
    assert!(matches!(
        h.registry.enable("toolgate").await.unwrap_err(),
        RegistryError::Config(ConfigError::ReservedName(_))
    ));
}

#[tokio::test]
async fn add_validates_before_persisting() {
    let h = harness();
    let mut config = parked("bad");
    config.url = Some("not a url".to_string());
    assert!(matches!(
        h.registry.add(config).await.unwrap_err(),
        RegistryError::Config(ConfigError::InvalidUrl { .. })
    ));
    assert!(h.repo.stored("bad").is_none());
}

#[tokio::test]
async fn mixed_transport_fields_are_rejected() {
    let h = harness();
    let mut config = parked("mixed");
    config.command = Some("run-thing".to_string());
    assert!(matches!(
        h.registry.add(config).await.unwrap_err(),
        RegistryError::Config(ConfigError::MixedTransportFields(_))
    ));
}

#[tokio::test]
async fn enable_and_disable_are_idempotent() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();

    h.registry.enable("docs").await.unwrap();
    assert!(h.repo.stored("docs").unwrap().enabled);
    h.registry.enable("docs").await.unwrap();
    // The second enable was a no-op; only one toggle was persisted.
    assert_eq!(h.repo.enabled_calls.lock().len(), 1);

    h.registry.disable("docs").await.unwrap();
    assert!(!h.repo.stored("docs").unwrap().enabled);
    h.registry.disable("docs").await.unwrap();
    assert_eq!(h.repo.enabled_calls.lock().len(), 2);
}

#[tokio::test]
async fn enabled_only_update_is_a_plain_toggle() {
    let h = harness();
    let mut config = parked("docs");
    config.session_token = Some("keep-me".to_string());
    h.registry.add(config).await.unwrap();

    let update = BackendUpdate {
        enabled: Some(true),
        ..BackendUpdate::default()
    };
    h.registry.update("docs", update).await.unwrap();

    let stored = h.repo.stored("docs").unwrap();
    assert!(stored.enabled);
    // A toggle must not rewrite the rest of the record.
    assert_eq!(stored.session_token.as_deref(), Some("keep-me"));
}

#[tokio::test]
async fn update_validates_the_merged_config() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();

    let update = BackendUpdate {
        url: Some(Some("definitely not a url".to_string())),
        ..BackendUpdate::default()
    };
    assert!(matches!(
        h.registry.update("docs", update).await.unwrap_err(),
        RegistryError::Config(ConfigError::InvalidUrl { .. })
    ));
    // The stored record is untouched.
    assert_eq!(
        h.repo.stored("docs").unwrap().url.as_deref(),
        Some("https://example.invalid/rpc")
    );
}

#[tokio::test]
async fn update_unknown_backend_is_not_found() {
    let h = harness();
    let err = h
        .registry
        .update("ghost", BackendUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_config_credentials_and_instance() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();
    h.credentials
        .save(&credential_fixture("docs", "https://auth.example.com/token"))
        .await
        .unwrap();
    // Materialize an instance so deletion has something to drop.
    h.supervisor.table().instance("docs");

    h.registry.delete("docs").await.unwrap();

    assert!(h.repo.stored("docs").is_none());
    assert!(h.credentials.stored("docs").is_none());
    assert!(h.supervisor.table().get("docs").is_none());
    assert!(matches!(
        h.registry.get("docs").await.unwrap_err(),
        RegistryError::NotFound(_)
    ));
}

#[tokio::test]
async fn put_credentials_requires_an_existing_backend() {
    let h = harness();
    let err = h
        .registry
        .put_credentials(credential_fixture("ghost", "https://auth.example.com/token"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[tokio::test]
async fn put_credentials_saves_without_restart_when_disabled() {
    let h = harness();
    h.registry.add(parked("docs")).await.unwrap();
    h.registry
        .put_credentials(credential_fixture("docs", "https://auth.example.com/token"))
        .await
        .unwrap();
    assert!(h.credentials.stored("docs").is_some());
}

#[tokio::test]
async fn update_during_inflight_connect_lands_on_the_new_configuration() {
    let h = harness();

    // A sluggish endpoint keeps the first connect attempt in flight while
    // the update below changes the url out from under it.
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            rpc_result(serde_json::json!({"tools": []}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&slow)
        .await;
    let fast = tests::endpoint::healthy().await;

    h.registry
        .add(BackendConfig::http("docs", slow.uri()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let update = BackendUpdate {
        url: Some(Some(fast.uri())),
        ..BackendUpdate::default()
    };
    h.registry.update("docs", update).await.unwrap();

    // The restart must wait out the stale attempt and reconnect to the new
    // endpoint, not silently lose the update.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !fast.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "reconnect never reached the updated endpoint"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let supervisor = Arc::clone(&h.supervisor);
    let connected = wait_for(Duration::from_secs(5), move || {
        supervisor
            .table()
            .get("docs")
            .map(|i| i.status() == BackendStatus::Connected)
            .unwrap_or(false)
    })
    .await;
    assert!(connected, "backend never settled under the new configuration");
}

#[tokio::test]
async fn add_enabled_backend_kicks_off_a_connect() {
    let h = harness();
    let server = tests::endpoint::healthy().await;
    h.registry
        .add(BackendConfig::http("docs", server.uri()))
        .await
        .unwrap();

    let supervisor = Arc::clone(&h.supervisor);
    let connected = wait_for(Duration::from_secs(5), move || {
        supervisor
            .table()
            .get("docs")
            .map(|i| i.status() == BackendStatus::Connected)
            .unwrap_or(false)
    })
    .await;
    assert!(connected, "background connect never landed");
}
