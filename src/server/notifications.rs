// ABOUTME: Notification REST endpoints and the SSE event stream

use std::collections::BTreeSet;
use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::models::{Notification, NotificationChannel, NotificationKind};

use super::AppState;

pub async fn pending(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "notifications": state.notifications.pending() }))
}

/// External hook endpoint: post an explicit alert/prompt notification.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    container_id: String,
    session_name: String,
    #[serde(default)]
    window_index: u32,
    title: String,
    #[serde(default)]
    message: String,
    kind: NotificationKind,
    #[serde(default)]
    channels: BTreeSet<NotificationChannel>,
}

pub async fn publish(
    State(state): State<AppState>,
    Json(body): Json<PublishBody>,
) -> Result<Json<Notification>, ApiError> {
    if body.container_id.trim().is_empty() || body.session_name.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "containerId and sessionName are required".into(),
        ));
    }
    let notification = state.notifications.publish(Notification::new(
        body.container_id,
        body.session_name,
        body.window_index,
        body.title,
        body.message,
        body.kind,
        body.channels,
    ));
    Ok(Json(notification))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissBody {
    container_id: String,
    session_name: String,
    #[serde(default)]
    window_index: Option<u32>,
}

pub async fn dismiss(
    State(state): State<AppState>,
    Json(body): Json<DismissBody>,
) -> Json<serde_json::Value> {
    let dismissed =
        state
            .notifications
            .dismiss(&body.container_id, &body.session_name, body.window_index);
    Json(json!({ "dismissed": dismissed }))
}

/// GET /notifications/stream: every event is named `notification` and carries
/// the full model as JSON.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifications.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let notification = item.ok()?;
        let data = serde_json::to_string(&notification).ok()?;
        Some(Ok(Event::default().event("notification").data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
