// ABOUTME: Container, session and window endpoints over the registry and adapter

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::docker::{CreateEvent, CreateRequest};
use crate::error::ApiError;
use crate::models::PaneTarget;

use super::AppState;

pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let list = state.registry.list();
    // Last-known sessions ride along so clients render one round-trip.
    let sessions: std::collections::HashMap<String, Vec<crate::models::TmuxSession>> = list
        .containers
        .iter()
        .map(|c| (c.id.clone(), state.registry.sessions(&c.id)))
        .collect();
    Json(json!({
        "containers": list.containers,
        "sessions": sessions,
        "dockerError": list.docker_error,
    }))
}

/// POST /containers: the response is a `text/event-stream` narrating the
/// build; `complete` or `error` terminates it.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::InvalidArgument("name must not be empty".into()));
    }
    let events = state.registry.create_container(request);
    let stream = ReceiverStream::new(events).map(|event| {
        let name = match &event {
            CreateEvent::Step { .. } => "step",
            CreateEvent::Log { .. } => "log",
            CreateEvent::Complete { .. } => "complete",
            CreateEvent::Error { .. } => "error",
        };
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(name).data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.start_container(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.stop_container(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct RenameBody {
    name: String,
}

pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.rename_container(&id, &body.name).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.remove_container(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    let sessions = state.adapter.list_sessions(&source, &id).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Deserialize)]
pub struct SessionBody {
    name: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SessionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state.adapter.create_session(&source, &body.name).await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

pub async fn kill_session(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state.adapter.kill_session(&source, &name).await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<SessionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state
        .adapter
        .rename_session(&source, &name, &body.name)
        .await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

pub async fn create_window(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state.adapter.create_window(&source, &name).await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct SwapBody {
    a: u32,
    b: u32,
}

pub async fn swap_windows(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<SwapBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state
        .adapter
        .swap_windows(&source, &name, body.a, body.b)
        .await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

pub async fn kill_window(
    State(state): State<AppState>,
    Path((id, name, index)): Path<(String, String, u32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state.adapter.kill_window(&source, &name, index).await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    dst_session: String,
}

pub async fn move_window(
    State(state): State<AppState>,
    Path((id, name, index)): Path<(String, String, u32)>,
    Json(body): Json<MoveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    state
        .adapter
        .move_window(&source, &name, index, &body.dst_session)
        .await?;
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct CaptureQuery {
    #[serde(default)]
    ansi: bool,
}

pub async fn capture(
    State(state): State<AppState>,
    Path((id, name, index)): Path<(String, String, u32)>,
    Query(query): Query<CaptureQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    let target = PaneTarget::new(id, name, index);
    let bytes = state
        .adapter
        .capture_pane(&source, &target, query.ansi)
        .await?;
    Ok(Json(json!({
        "content": String::from_utf8_lossy(&bytes),
    })))
}

#[derive(Deserialize)]
pub struct SendKeysBody {
    data: String,
}

pub async fn send_keys(
    State(state): State<AppState>,
    Path((id, name, index)): Path<(String, String, u32)>,
    Json(body): Json<SendKeysBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    let target = PaneTarget::new(id, name, index);
    state.adapter.send_keys(&source, &target, &body.data).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Explicit ack clearing a window's bell/activity flags.
pub async fn clear_status(
    State(state): State<AppState>,
    Path((id, name, index)): Path<(String, String, u32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = state.registry.resolve_source(&id)?;
    let target = PaneTarget::new(id.clone(), name.clone(), index);
    state.adapter.clear_status(&source, &target).await?;
    state.notifications.dismiss(&id, &name, Some(index));
    state.registry.poll().await;
    Ok(Json(json!({ "ok": true })))
}
