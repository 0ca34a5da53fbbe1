// ABOUTME: PIN setup, login/logout and auth status endpoints

use axum::extract::State;
use axum::http::{header::SET_COOKIE, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AuthError, SESSION_COOKIE};
use crate::error::ApiError;
use crate::models::SESSION_TTL_DAYS;

use super::{session_token, AppState};

#[derive(Deserialize)]
pub(crate) struct PinBody {
    pin: String,
}

#[derive(Deserialize)]
pub(crate) struct ChangePinBody {
    current: String,
    pin: String,
}

pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let token = session_token(&headers);
    Json(json!({
        "pinSet": state.auth.pin_set(),
        "authenticated": state.auth.is_authenticated(token.as_deref()),
    }))
}

pub async fn setup(
    State(state): State<AppState>,
    Json(body): Json<PinBody>,
) -> Result<Response, ApiError> {
    state.auth.setup_pin(&body.pin).map_err(map_auth)?;
    // Setting up the PIN logs the caller in immediately.
    let token = state.auth.login(&body.pin).map_err(map_auth)?;
    Ok(with_session_cookie(token, json!({ "pinSet": true })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<PinBody>,
) -> Result<Response, ApiError> {
    let token = state.auth.login(&body.pin).map_err(map_auth)?;
    Ok(with_session_cookie(token, json!({ "ok": true })))
}

pub async fn change(
    State(state): State<AppState>,
    Json(body): Json<ChangePinBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .auth
        .change_pin(&body.current, &body.pin)
        .map_err(map_auth)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.auth.logout(&token);
    }
    let clear = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0; SameSite=Strict");
    ([(SET_COOKIE, clear)], Json(json!({ "ok": true }))).into_response()
}

fn with_session_cookie(token: String, body: serde_json::Value) -> Response {
    let max_age = SESSION_TTL_DAYS * 24 * 60 * 60;
    let cookie =
        format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; Max-Age={max_age}; SameSite=Strict");
    ([(SET_COOKIE, cookie)], Json(body)).into_response()
}

fn map_auth(err: AuthError) -> ApiError {
    match err {
        AuthError::InvalidCredentials => ApiError::Unauthorized,
        AuthError::PinTooWeak | AuthError::PinAlreadySet => {
            ApiError::InvalidArgument(err.to_string())
        }
        AuthError::Kdf(m) => ApiError::Internal(m),
        AuthError::Store(e) => ApiError::Internal(e.to_string()),
    }
}
