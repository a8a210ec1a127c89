//! HTTP request handlers.

use super::AppState;
use crate::db::{ConnectionRecord, DEFAULT_MYSQL_PORT};
use crate::monitor::{MonitorError, Preferences, TargetAction, TargetKey};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

/// Map a monitor failure to a response.
pub fn monitor_error_response(err: MonitorError) -> Response {
    let status = match &err {
        MonitorError::NotFound(_) | MonitorError::UnknownConnection(_) => StatusCode::NOT_FOUND,
        MonitorError::DuplicateTarget(_) => StatusCode::CONFLICT,
        MonitorError::IndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
        MonitorError::Action(_) => StatusCode::BAD_GATEWAY,
        MonitorError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        MonitorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.monitor.snapshot().await {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    #[serde(default = "default_host")]
    pub host: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

pub async fn handle_add_service(
    State(state): State<AppState>,
    Json(req): Json<AddServiceRequest>,
) -> impl IntoResponse {
    if req.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Service name is required").into_response();
    }

    match state
        .monitor
        .add_service(&req.host, req.name.trim(), req.display_name)
        .await
    {
        Ok(key) => (StatusCode::CREATED, Json(json!({ "key": key }))).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddInstanceRequest {
    pub connection_id: String,
}

pub async fn handle_add_instance(
    State(state): State<AppState>,
    Json(req): Json<AddInstanceRequest>,
) -> impl IntoResponse {
    match state.monitor.add_instance(&req.connection_id).await {
        Ok(outcome) if outcome.already_monitored => Json(outcome).into_response(),
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

pub async fn handle_remove_target(
    State(state): State<AppState>,
    Query(q): Query<KeyQuery>,
) -> impl IntoResponse {
    match state.monitor.remove(TargetKey::from(q.key)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => monitor_error_response(e),
    }
}

pub async fn handle_set_preferences(
    State(state): State<AppState>,
    Query(q): Query<KeyQuery>,
    Json(prefs): Json<Preferences>,
) -> impl IntoResponse {
    if prefs.poll_interval_secs == Some(0) {
        return (StatusCode::BAD_REQUEST, "Poll interval must be positive").into_response();
    }

    match state
        .monitor
        .set_preferences(TargetKey::from(q.key), prefs)
        .await
    {
        Ok(changed) => Json(json!({ "changed": changed })).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    pub key: String,
    pub action: String,
}

pub async fn handle_action(
    State(state): State<AppState>,
    Query(q): Query<ActionQuery>,
) -> impl IntoResponse {
    let action: TargetAction = match q.action.parse() {
        Ok(a) => a,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state
        .monitor
        .perform_action(TargetKey::from(q.key), action)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn handle_refresh(
    State(state): State<AppState>,
    Query(q): Query<RefreshQuery>,
) -> impl IntoResponse {
    match state.monitor.refresh_all(q.force).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

// ============================================================================
// API: Connections
// ============================================================================

pub async fn handle_get_connections(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_connections() {
        Ok(connections) => Json(connections).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user_name: String,
}

impl ConnectionRequest {
    fn into_record(self, id: String) -> ConnectionRecord {
        ConnectionRecord {
            id,
            name: self.name,
            host: self.host,
            port: self.port,
            user_name: self.user_name,
        }
    }
}

pub async fn handle_create_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> impl IntoResponse {
    let id = match req.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return (StatusCode::BAD_REQUEST, "Connection id is required").into_response(),
    };

    match state.store.get_connection(&id) {
        Ok(Some(_)) => return (StatusCode::CONFLICT, "Connection already exists").into_response(),
        Ok(None) => {}
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }

    let record = req.into_record(id);
    match state.store.add_connection(&record) {
        Ok(()) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> impl IntoResponse {
    let record = req.into_record(id);

    match state.store.update_connection(&record) {
        Ok(()) => Json(record).into_response(),
        Err(crate::db::DbError::NotFound) => {
            (StatusCode::NOT_FOUND, "Connection not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_connection(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Menu
// ============================================================================

pub async fn handle_get_menu(State(state): State<AppState>) -> impl IntoResponse {
    match state.menu.snapshot().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Menu board is not running").into_response(),
    }
}
