//! Shared test utilities and fixtures for Toolgate integration tests.

use std::sync::Arc;

pub use toolgate_core::{
    BackendConfig, BackendStatus, BackendUpdate, CredentialRecord, ReconnectPolicy, Tool,
    TransportKind,
};

pub use mocks::{
    FakeClient, MockBackendRepo, MockCredentialRepo, MockInstaller, MockSecretStore,
};

/// A credential record pointing at the given token endpoint.
pub fn credential_fixture(backend: &str, token_url: &str) -> CredentialRecord {
    CredentialRecord::bearer(
        backend,
        "at-test",
        Some("rt-test".to_string()),
        None,
        "client-test",
        "https://auth.example.com/authorize",
        token_url,
    )
}

/// Wiremock helpers shared by the transport-level tests.
pub mod endpoint {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A JSON-RPC success body. The id is fixed; the gateway's HTTP client
    /// does not correlate ids on the response path.
    pub fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        }))
    }

    /// Start a mock endpoint that accepts the full handshake and answers
    /// `tools/list` with an empty catalog.
    pub async fn healthy() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(serde_json::json!({"tools": []})))
            .mount(&server)
            .await;
        server
    }
}

/// Poll until `predicate` holds or the timeout expires.
pub async fn wait_for<F>(timeout: std::time::Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Install a fake live connection on the table so router/catalog tests can
/// run without a real transport.
pub async fn install_fake_connection(
    table: &toolgate_gateway::ConnectionTable,
    backend: &str,
    client: Arc<FakeClient>,
) -> Arc<toolgate_gateway::BackendInstance> {
    let instance = table.instance(backend);
    let lifecycle = tokio::spawn(async {});
    instance
        .install_connection(toolgate_gateway::LiveConnection {
            client,
            kind: TransportKind::Http,
            lifecycle,
        })
        .await;
    instance.mark_connected();
    instance
}
