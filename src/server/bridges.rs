// ABOUTME: Bridge record endpoints; creation returns the cleartext token exactly once

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bridge::BridgeError;
use crate::error::ApiError;
use crate::models::BridgeRecord;

use super::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeView {
    #[serde(flatten)]
    record: RecordView,
    connected: bool,
}

/// The token hash never leaves the server.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordView {
    id: String,
    name: String,
    enabled: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<BridgeRecord> for RecordView {
    fn from(record: BridgeRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            enabled: record.enabled,
            created_at: record.created_at,
            last_seen: record.last_seen,
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let bridges: Vec<BridgeView> = state
        .hub
        .list()
        .into_iter()
        .map(|(record, connected)| BridgeView {
            record: record.into(),
            connected,
        })
        .collect();
    Json(json!({ "bridges": bridges }))
}

#[derive(Deserialize)]
pub struct CreateBody {
    name: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::InvalidArgument("name must not be empty".into()));
    }
    let (record, token) = state.hub.create(&body.name).map_err(map_bridge)?;
    Ok(Json(json!({
        "bridge": RecordView::from(record),
        // Shown once; only the hash survives.
        "token": token,
    })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.hub.delete(&id).map_err(map_bridge)?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct EnabledBody {
    enabled: bool,
}

pub async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .hub
        .set_enabled(&id, body.enabled)
        .map_err(map_bridge)?;
    Ok(Json(json!({ "ok": true })))
}

fn map_bridge(err: BridgeError) -> ApiError {
    match err {
        BridgeError::NotFound(id) => ApiError::TargetMissing(format!("bridge not found: {id}")),
        BridgeError::Store(e) => ApiError::Internal(e.to_string()),
        BridgeError::Internal(m) => ApiError::Internal(m),
    }
}
