// ABOUTME: Read and replace the persisted server settings

use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::store::Settings;

use super::AppState;

pub async fn get(State(state): State<AppState>) -> Json<Settings> {
    Json(state.store.load_settings())
}

pub async fn update(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    if settings.telegram_timeout_secs == 0 {
        return Err(ApiError::InvalidArgument(
            "telegramTimeoutSecs must be positive".into(),
        ));
    }
    if settings.report_interval_secs == 0 {
        return Err(ApiError::InvalidArgument(
            "reportIntervalSecs must be positive".into(),
        ));
    }
    state.store.save_settings(&settings)?;
    Ok(Json(settings))
}
