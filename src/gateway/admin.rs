//! Administrative JSON routes under `/admin`.
//!
//! Tools are shown by their unprefixed name and switched by the record id.
//! Adding or rebuilding a server answers only after build and mount finish.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::router::AppState;
use super::server::provision;
use crate::Error;
use crate::container::build_and_record;
use crate::store::{NewSubServer, SubServerConfig};

/// Admin routes, nested under `/admin` by the main router
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/servers", get(list_servers).post(create_server))
        .route("/servers/{id}", get(get_server).delete(delete_server))
        .route("/servers/{id}/rebuild", post(rebuild_server))
        .route("/servers/{id}/active", put(set_active))
        .route("/servers/{id}/tools", get(server_tools))
        .route("/tools/{tool_id}", put(set_tool_enabled))
}

/// Error wrapper mapping the crate error onto HTTP statuses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::BackendNotFound(_) => StatusCode::NOT_FOUND,
            Error::Build { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Admin request failed");
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ActiveBody {
    active: bool,
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

fn not_found(id: &str) -> ApiError {
    ApiError(Error::BackendNotFound(format!("Sub-server {id}")))
}

/// Stored configuration plus its live mount state
fn server_json(state: &AppState, config: &SubServerConfig) -> Value {
    let mut value =
        serde_json::to_value(config.redacted()).unwrap_or_else(|_| json!({"id": config.id}));
    if let Some(object) = value.as_object_mut() {
        object.insert("mount_state".to_string(), json!(state.registry.state(&config.id)));
    }
    value
}

async fn load(state: &AppState, id: &str) -> ApiResult<SubServerConfig> {
    state.store.get_server(id).await?.ok_or_else(|| not_found(id))
}

async fn list_servers(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let servers = state.store.list_servers().await?;
    let servers: Vec<Value> = servers.iter().map(|s| server_json(&state, s)).collect();
    Ok(Json(json!({"servers": servers})))
}

async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let config = load(&state, &id).await?;
    Ok(Json(server_json(&state, &config)))
}

/// Store, build, and (when active) mount a new configuration
async fn create_server(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewSubServer>,
) -> ApiResult<Response> {
    let config = state.store.insert_server(input).await?;
    info!(server = %config.id, name = %config.name, "Sub-server added, building");

    let outcome = build_then_mount(&state, &config).await;
    let stored = load(&state, &config.id).await?;
    match outcome {
        Ok(mount) => Ok((
            StatusCode::CREATED,
            Json(json!({"server": server_json(&state, &stored), "mount": mount})),
        )
            .into_response()),
        Err(e @ Error::Build { .. }) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": e.to_string(), "server": server_json(&state, &stored)})),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn build_then_mount(state: &AppState, config: &SubServerConfig) -> crate::Result<Value> {
    if config.is_active {
        let status = provision(&state.store, &state.builder, &state.registry, config, true).await?;
        Ok(json!(status))
    } else {
        build_and_record(&state.store, &state.builder, config).await?;
        Ok(Value::Null)
    }
}

async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&id).await;
    if !state.store.delete_server(&id).await? {
        return Err(not_found(&id));
    }
    info!(server = %id, "Sub-server deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn rebuild_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let config = load(&state, &id).await?;
    let mount = build_then_mount(&state, &config).await?;
    let stored = load(&state, &id).await?;
    Ok(Json(json!({"server": server_json(&state, &stored), "mount": mount})))
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> ApiResult<Json<Value>> {
    if !state.store.set_active(&id, body.active).await? {
        return Err(not_found(&id));
    }
    let config = load(&state, &id).await?;
    if body.active {
        if !state.registry.is_mounted(&id) {
            provision(&state.store, &state.builder, &state.registry, &config, false).await?;
        }
    } else {
        state.registry.remove(&id).await;
    }
    let stored = load(&state, &id).await?;
    Ok(Json(server_json(&state, &stored)))
}

async fn server_tools(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load(&state, &id).await?;
    let tools = state.store.tools_for_server(&id).await?;
    Ok(Json(json!({"server_id": id, "tools": tools})))
}

async fn set_tool_enabled(
    State(state): State<Arc<AppState>>,
    Path(tool_id): Path<i64>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<Json<Value>> {
    if !state.store.set_tool_enabled(tool_id, body.enabled).await? {
        return Err(ApiError(Error::BackendNotFound(format!("Tool record {tool_id}"))));
    }
    let record = state
        .store
        .get_tool(tool_id)
        .await?
        .ok_or_else(|| ApiError(Error::BackendNotFound(format!("Tool record {tool_id}"))))?;
    info!(
        server = %record.server_id,
        tool = %record.tool_name,
        enabled = record.is_enabled,
        "Tool switched"
    );
    Ok(Json(json!(record)))
}
