//! HTTP handlers for the gateway server

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use toolgate_core::{BackendConfig, BackendUpdate, ConfigError, CredentialRecord, InvokeError};

use super::AppState;
use crate::pool::RegistryError;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    debug!("Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Registry(e) => {
                let status = match &e {
                    RegistryError::Config(ConfigError::DuplicateName(_)) => StatusCode::CONFLICT,
                    RegistryError::Config(_) => StatusCode::BAD_REQUEST,
                    RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                    RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                error_body(status, e.to_string())
            }
            ApiError::Invoke(e) => {
                let status = match &e {
                    InvokeError::NotFound(_) => StatusCode::NOT_FOUND,
                    InvokeError::NotConnected(..) => StatusCode::CONFLICT,
                    InvokeError::Secrets(_) | InvokeError::Storage(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    InvokeError::Call(_) => StatusCode::BAD_GATEWAY,
                };
                error_body(status, e.to_string())
            }
        }
    }
}

/// Wrapper unifying the two failure families at the HTTP boundary.
pub enum ApiError {
    Registry(RegistryError),
    Invoke(InvokeError),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl From<InvokeError> for ApiError {
    fn from(e: InvokeError) -> Self {
        ApiError::Invoke(e)
    }
}

pub async fn list_backends(State(state): State<AppState>) -> Result<Response, ApiError> {
    let backends = state.registry.list().await?;
    Ok(Json(backends).into_response())
}

pub async fn get_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.registry.get(&name).await?;
    Ok(Json(backend).into_response())
}

pub async fn add_backend(
    State(state): State<AppState>,
    Json(config): Json<BackendConfig>,
) -> Result<Response, ApiError> {
    let name = config.name.clone();
    state.registry.add(config).await?;
    Ok((StatusCode::CREATED, Json(json!({ "name": name }))).into_response())
}

pub async fn update_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<BackendUpdate>,
) -> Result<Response, ApiError> {
    state.registry.update(&name, update).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.registry.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn enable_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.registry.enable(&name).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn disable_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.registry.disable(&name).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn put_credentials(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut record): Json<CredentialRecord>,
) -> Result<Response, ApiError> {
    // The path segment is authoritative.
    record.backend = name;
    state.registry.put_credentials(record).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_tools(State(state): State<AppState>) -> Result<Response, ApiError> {
    let catalog = state.router.list_tools().await?;
    Ok(Json(catalog).into_response())
}

/// Tool invocation request
#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub caller: String,
    pub backend: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

pub async fn call_tool(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .router
        .call_tool(
            &request.caller,
            &request.backend,
            &request.tool,
            request.arguments,
        )
        .await?;
    Ok(Json(result).into_response())
}
