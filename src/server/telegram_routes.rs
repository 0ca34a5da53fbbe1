// ABOUTME: Telegram chat discovery endpoint backing the settings UI

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::ApiError;

use super::AppState;

pub async fn chats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(telegram) = &state.telegram else {
        return Err(ApiError::SourceUnavailable(
            "telegram bot token is not configured".into(),
        ));
    };
    let chats = telegram
        .list_chats()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "chats": chats })))
}
