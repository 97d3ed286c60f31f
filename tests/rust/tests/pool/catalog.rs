//! Catalog fetcher retry behavior against a scripted client.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use tests::{install_fake_connection, BackendConfig, BackendStatus, FakeClient, MockBackendRepo};
use toolgate_core::{BackendRepository, ConnectError};
use toolgate_gateway::{CatalogConfig, CatalogFetcher, ConnectionTable};

fn fast_config(max_attempts: u32) -> CatalogConfig {
    CatalogConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        ..CatalogConfig::default()
    }
}

#[tokio::test]
async fn success_caches_tools_on_the_instance() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::http(
        "docs",
        "https://example.com/rpc",
    )));
    let table = ConnectionTable::new();
    let client = Arc::new(FakeClient::always(json!({
        "tools": [{"name": "search"}, {"name": "fetch"}]
    })));
    let instance = install_fake_connection(&table, "docs", client).await;

    let fetcher = CatalogFetcher::new(repo as Arc<dyn BackendRepository>, fast_config(3));
    let tools = fetcher.fetch(Arc::clone(&instance), None).await.unwrap();

    assert_eq!(tools.len(), 2);
    assert_eq!(instance.tools().len(), 2);
    assert_eq!(instance.status(), BackendStatus::Connected);
}

#[tokio::test]
async fn retries_until_a_good_response() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::http(
        "docs",
        "https://example.com/rpc",
    )));
    let table = ConnectionTable::new();
    let client = Arc::new(FakeClient::scripted(vec![
        Err(ConnectError::Protocol("listing not ready".into())),
        Ok(json!({"tools": [{"name": "search"}]})),
    ]));
    let instance = install_fake_connection(&table, "docs", Arc::clone(&client)).await;

    let fetcher = CatalogFetcher::new(Arc::clone(&repo) as Arc<dyn BackendRepository>, fast_config(3));
    let tools = fetcher.fetch(Arc::clone(&instance), None).await.unwrap();

    assert_eq!(tools.len(), 1);
    assert_eq!(client.request_methods(), vec!["tools/list", "tools/list"]);
    // The backend was never disabled along the way.
    assert!(repo.enabled_calls.lock().is_empty());
}

#[tokio::test]
async fn exhaustion_marks_failed_and_disables() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::http(
        "docs",
        "https://example.com/rpc",
    )));
    let table = ConnectionTable::new();
    let client = Arc::new(FakeClient::scripted(vec![
        Err(ConnectError::Protocol("bad".into())),
        Err(ConnectError::Protocol("bad".into())),
        Err(ConnectError::Protocol("bad".into())),
    ]));
    let instance = install_fake_connection(&table, "docs", client).await;

    let fetcher = CatalogFetcher::new(Arc::clone(&repo) as Arc<dyn BackendRepository>, fast_config(3));
    let result = fetcher.fetch(Arc::clone(&instance), None).await;

    assert!(result.is_err());
    assert_eq!(instance.status(), BackendStatus::Error);
    assert!(instance
        .last_error()
        .unwrap()
        .contains("tool catalog unavailable"));
    assert_eq!(
        repo.enabled_calls.lock().clone(),
        vec![("docs".to_string(), false)]
    );
    assert!(!repo.stored("docs").unwrap().enabled);
}

#[tokio::test]
async fn malformed_catalog_counts_as_a_failed_attempt() {
    let repo = Arc::new(MockBackendRepo::new().with_backend(BackendConfig::http(
        "docs",
        "https://example.com/rpc",
    )));
    let table = ConnectionTable::new();
    // First response lacks the tools field entirely.
    let client = Arc::new(FakeClient::scripted(vec![
        Ok(json!({"items": []})),
        Ok(json!({"tools": []})),
    ]));
    let instance = install_fake_connection(&table, "docs", client).await;

    let fetcher = CatalogFetcher::new(repo as Arc<dyn BackendRepository>, fast_config(3));
    let tools = fetcher.fetch(instance, None).await.unwrap();
    assert!(tools.is_empty());
}
