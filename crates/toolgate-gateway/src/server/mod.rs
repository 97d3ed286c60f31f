//! HTTP surface for the gateway.
//!
//! Thin layer over the registry and router: route parsing, JSON marshaling,
//! and status-code mapping. All real behavior lives in the pool.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::pool::{BackendRegistry, InvocationRouter};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub router: Arc<InvocationRouter>,
}

/// Build the gateway's route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/backends", get(handlers::list_backends))
        .route("/backends", post(handlers::add_backend))
        .route("/backends/{name}", get(handlers::get_backend))
        .route("/backends/{name}", patch(handlers::update_backend))
        .route("/backends/{name}", delete(handlers::delete_backend))
        .route("/backends/{name}/enable", post(handlers::enable_backend))
        .route("/backends/{name}/disable", post(handlers::disable_backend))
        .route(
            "/backends/{name}/credentials",
            put(handlers::put_credentials),
        )
        .route("/tools", get(handlers::list_tools))
        .route("/call", post(handlers::call_tool))
        .with_state(state)
}
