//! Connect state machine tests: the fallback ladder end to end against a
//! mock streaming-http endpoint, and the local-process failure path.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tests::endpoint::{healthy, rpc_result};
use tests::{
    credential_fixture, wait_for, BackendConfig, BackendStatus, MockBackendRepo,
    MockCredentialRepo, MockInstaller, MockSecretStore,
};
use toolgate_core::{BackendRepository, ConnectError, CredentialRepository, SecretStore};
use toolgate_gateway::{
    CatalogConfig, CatalogFetcher, ConnectionSupervisor, ConnectionTable, InvocationRouter,
    SupervisorConfig,
};

const SESSION_HEADER: &str = "mcp-session-id";

fn build_supervisor(
    repo: Arc<MockBackendRepo>,
    installer: Arc<MockInstaller>,
) -> Arc<ConnectionSupervisor> {
    build_supervisor_with(repo, Arc::new(MockCredentialRepo::new()), installer)
}

fn build_supervisor_with(
    repo: Arc<MockBackendRepo>,
    credentials: Arc<MockCredentialRepo>,
    installer: Arc<MockInstaller>,
) -> Arc<ConnectionSupervisor> {
    let backends: Arc<dyn BackendRepository> = repo;
    let credentials: Arc<dyn CredentialRepository> = credentials;
    let table = Arc::new(ConnectionTable::new());
    let catalog = Arc::new(CatalogFetcher::new(
        Arc::clone(&backends),
        CatalogConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            ..CatalogConfig::default()
        },
    ));
    Arc::new(ConnectionSupervisor::new(
        table,
        backends,
        credentials,
        installer,
        catalog,
        SupervisorConfig {
            connect_timeout: Duration::from_secs(5),
            ..SupervisorConfig::default()
        },
    ))
}

#[tokio::test]
async fn connects_and_caches_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_result(serde_json::json!({
            "tools": [{"name": "search", "description": "Search the docs"}]
        })))
        .mount(&server)
        .await;

    let repo = Arc::new(
        MockBackendRepo::new().with_backend(BackendConfig::http("docs", server.uri())),
    );
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("docs").await.unwrap();

    let instance = supervisor.table().get("docs").unwrap();
    assert_eq!(instance.status(), BackendStatus::Connected);

    // Catalog discovery runs in the background after the connect lands.
    let cached = {
        let instance = Arc::clone(&instance);
        wait_for(Duration::from_secs(5), move || !instance.tools().is_empty()).await
    };
    assert!(cached, "catalog never arrived");
    assert_eq!(instance.tools()[0].name, "search");
}

#[tokio::test]
async fn stale_session_token_is_cleared_and_replaced() {
    let server = MockServer::start().await;
    // Requests still carrying the stale token are rejected as unknown.
    Mock::given(method("POST"))
        .and(header(SESSION_HEADER, "stale"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // Once the token is gone the handshake succeeds and issues a fresh one.
    Mock::given(method("POST"))
        .respond_with(
            rpc_result(serde_json::json!({"tools": []})).insert_header(SESSION_HEADER, "fresh"),
        )
        .mount(&server)
        .await;

    let mut config = BackendConfig::http("docs", server.uri());
    config.session_token = Some("stale".to_string());
    let repo = Arc::new(MockBackendRepo::new().with_backend(config));
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("docs").await.unwrap();

    let instance = supervisor.table().get("docs").unwrap();
    assert_eq!(instance.status(), BackendStatus::Connected);

    // The stale token was cleared from storage before the retry, and the
    // fresh one was persisted after the handshake.
    let calls = repo.session_token_calls.lock().clone();
    assert_eq!(calls[0], ("docs".to_string(), None));
    assert_eq!(
        repo.stored("docs").unwrap().session_token.as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn handshake_refusal_falls_back_to_legacy_transport() {
    let server = MockServer::start().await;
    // The modern handshake is refused once; the legacy retry only succeeds
    // when it still carries the configured header and the managed bearer
    // token, otherwise it lands on the 500 catch-all.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(405))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("x-api-key", "k1"))
        .and(header("authorization", "Bearer at-test"))
        .respond_with(rpc_result(serde_json::json!({"tools": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = BackendConfig::http("legacy", server.uri());
    config
        .headers
        .insert("x-api-key".to_string(), "k1".to_string());
    let repo = Arc::new(MockBackendRepo::new().with_backend(config));
    let credentials = Arc::new(MockCredentialRepo::new().with_record(credential_fixture(
        "legacy",
        "https://auth.example.invalid/token",
    )));
    let supervisor = build_supervisor_with(
        Arc::clone(&repo),
        credentials,
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("legacy").await.unwrap();
    let instance = supervisor.table().get("legacy").unwrap();
    assert_eq!(instance.status(), BackendStatus::Connected);
}

#[tokio::test]
async fn managed_credential_supersedes_static_authorization_header() {
    let server = MockServer::start().await;
    // Only the managed token is accepted; a request still carrying the
    // statically configured header hits the 500 catch-all.
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer at-test"))
        .respond_with(rpc_result(serde_json::json!({"tools": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = BackendConfig::http("docs", server.uri());
    config.headers.insert(
        "Authorization".to_string(),
        "Bearer static-token".to_string(),
    );
    let repo = Arc::new(MockBackendRepo::new().with_backend(config));
    let credentials = Arc::new(MockCredentialRepo::new().with_record(credential_fixture(
        "docs",
        "https://auth.example.invalid/token",
    )));
    let supervisor = build_supervisor_with(
        Arc::clone(&repo),
        credentials,
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("docs").await.unwrap();
    assert_eq!(
        supervisor.table().get("docs").unwrap().status(),
        BackendStatus::Connected
    );

    // The stale static header never reached the endpoint.
    for request in server.received_requests().await.unwrap() {
        let sent = request.headers.get("authorization").unwrap();
        assert_eq!(sent.to_str().unwrap(), "Bearer at-test");
    }
}

#[tokio::test]
async fn stdio_failure_disables_backend_after_reinstall_attempt() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::stdio(
        "broken",
        "toolgate-test-missing-command",
    )));
    let installer = Arc::new(MockInstaller::reporting(false));
    let supervisor = build_supervisor(Arc::clone(&repo), Arc::clone(&installer));

    assert!(supervisor.connect("broken").await.is_err());

    let instance = supervisor.table().get("broken").unwrap();
    assert_eq!(instance.status(), BackendStatus::Error);
    assert!(instance.last_error().unwrap().contains("reinstall"));
    assert_eq!(installer.call_count(), 1);
    assert!(!repo.stored("broken").unwrap().enabled);
}

#[tokio::test]
async fn reinstall_success_earns_exactly_one_retry() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::stdio(
        "broken",
        "toolgate-test-missing-command",
    )));
    // The installer claims success but the command is still missing; the
    // retry must fail terminally instead of looping.
    let installer = Arc::new(MockInstaller::reporting(true));
    let supervisor = build_supervisor(Arc::clone(&repo), Arc::clone(&installer));

    assert!(supervisor.connect("broken").await.is_err());
    assert_eq!(installer.call_count(), 1);
    assert!(!repo.stored("broken").unwrap().enabled);
}

#[tokio::test]
async fn http_failure_never_disables_backend() {
    let server = MockServer::start().await;
    // 500 is not in the legacy fallback set; the attempt is terminal.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let repo = Arc::new(
        MockBackendRepo::new().with_backend(BackendConfig::http("flaky", server.uri())),
    );
    let installer = Arc::new(MockInstaller::reporting(false));
    let supervisor = build_supervisor(Arc::clone(&repo), Arc::clone(&installer));

    assert!(supervisor.connect("flaky").await.is_err());

    let instance = supervisor.table().get("flaky").unwrap();
    assert_eq!(instance.status(), BackendStatus::Error);
    // Remote backends stay enabled; the installer is never consulted.
    assert!(repo.stored("flaky").unwrap().enabled);
    assert!(repo.enabled_calls.lock().is_empty());
    assert_eq!(installer.call_count(), 0);
}

#[tokio::test]
async fn disabled_backend_is_registered_but_never_connected() {
    let mut config = BackendConfig::http("parked", "https://example.invalid/rpc");
    config.enabled = false;
    let repo = Arc::new(MockBackendRepo::new().with_backend(config));
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("parked").await.unwrap();
    // The instance exists for status surfaces, but no attempt started.
    let instance = supervisor.table().get("parked").unwrap();
    assert_eq!(instance.status(), BackendStatus::Disconnected);
    assert!(!instance.is_connected().await);
}

/// A shell backend speaking newline-delimited JSON-RPC: every request gets
/// the same canned result, except methods under `slow/`, which are never
/// answered.
const SHELL_BACKEND: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"method":"slow/'*) ;;
    *'"id":'*)
      id=${line#*'"id":'}
      id=${id%%[!0-9]*}
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo"}],"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
  esac
done"#;

fn shell_backend_config(name: &str) -> BackendConfig {
    let mut config = BackendConfig::stdio(name, "sh");
    config.args = vec!["-c".to_string(), SHELL_BACKEND.to_string()];
    config
}

#[cfg(unix)]
#[tokio::test]
async fn local_process_backend_connects_and_serves_calls() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(shell_backend_config("local")));
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("local").await.unwrap();
    let instance = supervisor.table().get("local").unwrap();
    assert_eq!(instance.status(), BackendStatus::Connected);

    let cached = {
        let instance = Arc::clone(&instance);
        wait_for(Duration::from_secs(5), move || !instance.tools().is_empty()).await
    };
    assert!(cached, "catalog never arrived");
    assert_eq!(instance.tools()[0].name, "echo");

    let backends: Arc<dyn BackendRepository> = Arc::clone(&repo) as _;
    let secrets: Arc<dyn SecretStore> = Arc::new(MockSecretStore::new());
    let router = InvocationRouter::new(supervisor.table(), backends, secrets);
    let result = router
        .call_tool("agent", "local", "echo", serde_json::json!({"q": "ping"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "pong");
}

#[cfg(unix)]
#[tokio::test]
async fn local_process_request_timeout_leaves_the_connection_usable() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(shell_backend_config("local")));
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("local").await.unwrap();
    let instance = supervisor.table().get("local").unwrap();
    let client = instance.client().await.unwrap();

    // The backend swallows this one; the waiter is abandoned on timeout.
    let err = client
        .request("slow/never", None, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::Timeout(_)));

    // Later requests still route normally.
    let listed = client
        .request("tools/list", None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(listed["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn disconnect_tears_down_and_clears_catalog() {
    let server = healthy().await;
    let repo = Arc::new(
        MockBackendRepo::new().with_backend(BackendConfig::http("docs", server.uri())),
    );
    let supervisor = build_supervisor(
        Arc::clone(&repo),
        Arc::new(MockInstaller::reporting(false)),
    );

    supervisor.connect("docs").await.unwrap();
    supervisor.disconnect("docs").await;

    let instance = supervisor.table().get("docs").unwrap();
    assert_eq!(instance.status(), BackendStatus::Disconnected);
    assert!(instance.tools().is_empty());
    assert!(!instance.is_connected().await);
}
