//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::admin;
use super::registry::MountRegistry;
use super::session::SessionStore;
use crate::container::ImageBuilder;
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcResponse, RequestId};
use crate::store::Store;

const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

/// Shared application state
pub struct AppState {
    /// Configuration and tool record storage
    pub store: Store,
    /// Image builder for admin adds and rebuilds
    pub builder: ImageBuilder,
    /// Live mounts; owns every write to the routing tables
    pub registry: Arc<MountRegistry>,
    /// Client sessions on `/mcp`
    pub sessions: SessionStore,
    /// Maximum accepted request body, in bytes
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_handler).delete(mcp_delete_handler))
        .nest("/admin", admin::routes())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// DELETE /mcp handler - Session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match session_header(&headers) {
        Some(id) if state.sessions.remove(&id) => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT
        }
        Some(id) => {
            debug!(session_id = %id, "Session not found for DELETE");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::BAD_REQUEST,
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mounts = state.registry.statuses();
    let router = state.registry.router();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "mounts": state.registry.len(),
        "servers": mounts,
        "sessions": state.sessions.len(),
        "listing_cache": router.cache_stats(),
    }))
}

/// POST /mcp handler
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    http_request: axum::http::Request<axum::body::Body>,
) -> Response {
    let headers = http_request.headers().clone();

    let body_bytes = match axum::body::to_bytes(http_request.into_body(), state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                rpc_codes::PARSE_ERROR,
                format!("Failed to read body: {e}"),
            );
        }
    };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                rpc_codes::PARSE_ERROR,
                format!("Invalid JSON: {e}"),
            );
        }
    };

    if request.is_array() {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            rpc_codes::INVALID_REQUEST,
            "Batch requests are not supported",
        );
    }

    // Replies to server-initiated requests; the gateway never sends any.
    if request.get("method").is_none()
        && (request.get("result").is_some() || request.get("error").is_some())
    {
        debug!("Ignoring client response message");
        return StatusCode::ACCEPTED.into_response();
    }

    let (id, method, params) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    let session_id = session_header(&headers);
    debug!(method = %method, session_id = ?session_id, "MCP request");

    if is_notification_method(&method) {
        if method == "notifications/initialized" {
            match &session_id {
                Some(sid) if state.sessions.mark_initialized(sid) => {
                    info!(session_id = %sid, "Session initialized");
                }
                _ => warn!(session_id = ?session_id, "Initialized notification for unknown session"),
            }
        }
        return StatusCode::ACCEPTED.into_response();
    }

    // For requests, id is guaranteed to exist (checked in parse_request)
    let Some(id) = id else {
        return rpc_error(StatusCode::BAD_REQUEST, rpc_codes::INVALID_REQUEST, "Missing id");
    };

    let session_id = if method == "initialize" {
        let sid = state.sessions.create();
        info!(session_id = %sid, "Session created");
        Some(sid)
    } else if method == "ping" {
        session_id
    } else {
        match check_session(&state.sessions, session_id, &id) {
            Ok(sid) => Some(sid),
            Err(response) => return response,
        }
    };

    let response = state.registry.router().handle(id, &method, params).await;
    with_session(Json(response).into_response(), session_id.as_deref())
}

/// Every method except `initialize` and `ping` needs a ready session
#[allow(clippy::result_large_err)]
fn check_session(
    sessions: &SessionStore,
    session_id: Option<String>,
    id: &RequestId,
) -> Result<String, Response> {
    let reject = |status: StatusCode, message: &str| {
        let body = JsonRpcResponse::error(Some(id.clone()), rpc_codes::INVALID_REQUEST, message);
        (status, Json(body)).into_response()
    };

    let Some(sid) = session_id else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Missing mcp-session-id header; send initialize first",
        ));
    };
    if !sessions.contains(&sid) {
        return Err(reject(StatusCode::NOT_FOUND, "Unknown session"));
    }
    if !sessions.is_initialized(&sid) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Session not initialized; send notifications/initialized first",
        ));
    }
    Ok(sid)
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn with_session(mut response: Response, session_id: Option<&str>) -> Response {
    if let Some(value) = session_id.and_then(|sid| HeaderValue::from_str(sid).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn rpc_error(status: StatusCode, code: i32, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0.
/// Returns `None` if the value is not a recognised ID type.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    if let Some(s) = value.as_str() {
        Some(RequestId::String(s.to_string()))
    } else if let Some(n) = value.as_i64() {
        Some(RequestId::Number(n))
    } else {
        #[allow(clippy::cast_possible_wrap)]
        value.as_u64().map(|n| RequestId::Number(n as i64))
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Parse JSON-RPC request or notification
/// Returns (Option<RequestId>, method, params) - id is None for notifications
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as HTTP error body
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    // Required for requests, absent for notifications
    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // =====================================================================
    // extract_request_id
    // =====================================================================

    #[test]
    fn extract_request_id_string_value() {
        let id = extract_request_id(&json!("abc-123")).unwrap();
        assert_eq!(id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn extract_request_id_integers() {
        assert_eq!(extract_request_id(&json!(42)), Some(RequestId::Number(42)));
        assert_eq!(extract_request_id(&json!(-1)), Some(RequestId::Number(-1)));
        assert_eq!(extract_request_id(&json!(0)), Some(RequestId::Number(0)));
    }

    #[test]
    fn extract_request_id_rejects_other_types() {
        assert!(extract_request_id(&json!(null)).is_none());
        assert!(extract_request_id(&json!(true)).is_none());
        assert!(extract_request_id(&json!(2.5)).is_none());
        assert!(extract_request_id(&json!([1, 2])).is_none());
        assert!(extract_request_id(&json!({"id": 1})).is_none());
    }

    // =====================================================================
    // is_notification_method
    // =====================================================================

    #[test]
    fn notification_method_recognized() {
        assert!(is_notification_method("notifications/initialized"));
        assert!(is_notification_method("notifications/cancelled"));
    }

    #[test]
    fn regular_method_not_notification() {
        assert!(!is_notification_method("initialize"));
        assert!(!is_notification_method("tools/list"));
        assert!(!is_notification_method("ping"));
        assert!(!is_notification_method(""));
    }

    // =====================================================================
    // parse_request
    // =====================================================================

    #[test]
    fn parse_request_valid_with_params() {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "abc12345_add", "arguments": {"a": 1}}
        });
        let (id, method, params) = parse_request(&req).unwrap();
        assert_eq!(id, Some(RequestId::Number(1)));
        assert_eq!(method, "tools/call");
        assert_eq!(params.unwrap()["name"], "abc12345_add");
    }

    #[test]
    fn parse_request_notification_without_id() {
        let req = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let (id, method, _params) = parse_request(&req).unwrap();
        assert!(id.is_none());
        assert_eq!(method, "notifications/initialized");
    }

    #[test]
    fn parse_request_wrong_jsonrpc_version() {
        for req in [
            json!({"id": 1, "method": "ping"}),
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": 2, "id": 1, "method": "ping"}),
        ] {
            let err = parse_request(&req).unwrap_err();
            let error = err.error.unwrap();
            assert_eq!(error.code, rpc_codes::INVALID_REQUEST);
            assert!(error.message.contains("JSON-RPC version"));
        }
    }

    #[test]
    fn parse_request_missing_method() {
        let err = parse_request(&json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert!(err.error.unwrap().message.contains("method"));
        let err = parse_request(&json!({"jsonrpc": "2.0", "id": 1, "method": 123})).unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn parse_request_non_notification_without_id() {
        let err = parse_request(&json!({"jsonrpc": "2.0", "method": "tools/list"})).unwrap_err();
        assert!(err.error.unwrap().message.contains("id"));
    }

    // =====================================================================
    // check_session
    // =====================================================================

    #[test]
    fn session_rules() {
        let sessions = SessionStore::new();
        let id = RequestId::Number(1);

        let missing = check_session(&sessions, None, &id).unwrap_err();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let unknown = check_session(&sessions, Some("gw-nope".to_string()), &id).unwrap_err();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let sid = sessions.create();
        let pending = check_session(&sessions, Some(sid.clone()), &id).unwrap_err();
        assert_eq!(pending.status(), StatusCode::BAD_REQUEST);

        sessions.mark_initialized(&sid);
        assert_eq!(check_session(&sessions, Some(sid.clone()), &id).unwrap(), sid);
    }
}
