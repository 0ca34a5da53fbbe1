// ABOUTME: Terminal WebSocket upgrade handing the socket to the broker

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;

use super::AppState;

pub async fn upgrade(
    State(state): State<AppState>,
    Path((container_id, session_name, window_index)): Path<(String, String, u32)>,
    ws: WebSocketUpgrade,
) -> Response {
    let broker = state.broker.clone();
    ws.on_upgrade(move |socket| {
        broker.handle_socket(socket, container_id, session_name, window_index)
    })
}
