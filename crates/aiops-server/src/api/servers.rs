use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use aiops_persistence::models::ServerCredential;
use aiops_types::{AuthType, HostOs, Protocol};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// The wire shape for `POST /api/servers`: every `ServerCredential` field
/// except `secret_material_encrypted`, which this build never accepts
/// pre-encrypted — only the plaintext `secret_material` it encrypts itself.
#[derive(Debug, Deserialize)]
pub struct ServerCreateRequest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub hostname: String,
    pub port: i64,
    pub username: String,
    pub os_type: HostOs,
    pub auth_type: AuthType,
    pub secret_material: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub winrm_transport: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_auth_type: Option<AuthType>,
    #[serde(default = "default_true")]
    pub api_verify_ssl: bool,
    #[serde(default = "default_api_timeout")]
    pub api_timeout_seconds: i64,
}

fn default_true() -> bool {
    true
}

fn default_api_timeout() -> i64 {
    30
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<ServerCredential>>> {
    Ok(Json(state.store.list_servers().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ServerCredential>> {
    Ok(Json(state.store.get_server(&id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<ServerCreateRequest>,
) -> ApiResult<Json<ServerCredential>> {
    let master_key = state
        .settings
        .resolve_master_key()
        .map_err(|err| ApiError::validation(err.to_string()))?;

    let server = ServerCredential {
        id: if req.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { req.id },
        name: req.name,
        protocol: req.protocol,
        hostname: req.hostname,
        port: req.port,
        username: req.username,
        os_type: req.os_type,
        auth_type: req.auth_type,
        secret_material_encrypted: aiops_persistence::secrets::encrypt(&master_key, &req.secret_material),
        tags: req.tags,
        environment: req.environment,
        winrm_transport: req.winrm_transport,
        api_base_url: req.api_base_url,
        api_auth_type: req.api_auth_type,
        api_verify_ssl: req.api_verify_ssl,
        api_timeout_seconds: req.api_timeout_seconds,
    };

    state.store.create_server(&server).await?;
    Ok(Json(state.store.get_server(&server.id).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_server(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
