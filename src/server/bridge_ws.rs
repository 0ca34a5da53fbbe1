// ABOUTME: Bridge WebSocket upgrade; auth happens in-band on the first frame

use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::bridge::handle_bridge_socket;

use super::{session_token, AppState};

pub async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // A valid session cookie lets the first frame name its record instead of
    // presenting a bridge token. Bridge tokens work nowhere else.
    let token = session_token(&headers);
    let cookie_authed = state.auth.is_authenticated(token.as_deref());
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_bridge_socket(hub, socket, cookie_authed))
}
