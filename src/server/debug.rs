// ABOUTME: Debug ring endpoints: snapshot, clear, client-side entries

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::debug_ring::DebugLevel;

use super::AppState;

pub async fn snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "entries": state.ring.snapshot(),
        "activeChannels": state.broker.active_channels(),
    }))
}

pub async fn clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.ring.clear();
    Json(json!({ "ok": true }))
}

/// Remote clients post their own events; sources get a `ui:` prefix so they
/// are distinguishable from server-side writers.
#[derive(Deserialize)]
pub struct ClientEntry {
    level: DebugLevel,
    source: String,
    message: String,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

pub async fn push(
    State(state): State<AppState>,
    Json(entry): Json<ClientEntry>,
) -> Json<serde_json::Value> {
    state
        .ring
        .push_client(entry.level, &entry.source, entry.message, entry.detail);
    Json(json!({ "ok": true }))
}
