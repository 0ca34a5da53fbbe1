// ABOUTME: Classified error kinds surfaced across the HTTP API, WebSockets and CLI

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// WebSocket close code for a missing/expired credential.
pub const WS_CLOSE_UNAUTHORIZED: u16 = 4401;
/// WebSocket close code when the target did not exist at open.
pub const WS_CLOSE_TARGET_MISSING: u16 = 4404;
/// WebSocket close code when the target vanished mid-stream.
pub const WS_CLOSE_TARGET_GONE: u16 = 4410;
/// WebSocket close code for unexpected internal failures.
pub const WS_CLOSE_INTERNAL: u16 = 1011;
/// WebSocket close code for a rejected bridge authentication frame.
pub const WS_CLOSE_POLICY: u16 = 1008;
/// WebSocket close code when a newer bridge connection supersedes this one.
pub const WS_CLOSE_SUPERSEDED: u16 = 1012;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    TargetMissing(String),

    #[error("target gone: {0}")]
    TargetGone(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::TargetMissing(_) | ApiError::TargetGone(_) => StatusCode::NOT_FOUND,
            ApiError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NameConflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Close code when the same condition is discovered at WebSocket open.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            ApiError::Unauthorized => WS_CLOSE_UNAUTHORIZED,
            ApiError::TargetMissing(_) => WS_CLOSE_TARGET_MISSING,
            ApiError::TargetGone(_) | ApiError::SourceUnavailable(_) => WS_CLOSE_TARGET_GONE,
            _ => WS_CLOSE_INTERNAL,
        }
    }

    /// Machine-readable kind tag included in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::TargetMissing(_) => "target_missing",
            ApiError::TargetGone(_) => "target_gone",
            ApiError::SourceUnavailable(_) => "source_unavailable",
            ApiError::NameConflict(_) => "name_conflict",
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<crate::tmux::TmuxError> for ApiError {
    fn from(err: crate::tmux::TmuxError) -> Self {
        use crate::tmux::TmuxError;
        match err {
            TmuxError::SourceUnavailable(m) => ApiError::SourceUnavailable(m),
            TmuxError::TargetMissing(m) => ApiError::TargetMissing(m),
            TmuxError::NameConflict(m) => ApiError::NameConflict(m),
            TmuxError::InvalidArgument(m) => ApiError::InvalidArgument(m),
            TmuxError::Internal(m) => ApiError::Internal(m),
        }
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::docker::ContainerError> for ApiError {
    fn from(err: crate::docker::ContainerError) -> Self {
        use crate::docker::ContainerError;
        match err {
            ContainerError::NotFound(m) => ApiError::TargetMissing(m),
            ContainerError::AlreadyExists(m) => ApiError::NameConflict(m),
            ContainerError::InvalidConfig(m) => ApiError::InvalidArgument(m),
            ContainerError::EngineUnavailable(m) => ApiError::SourceUnavailable(m),
            ContainerError::Connection(e) => ApiError::SourceUnavailable(e.to_string()),
            ContainerError::OperationFailed(m) | ContainerError::Timeout(m) => {
                ApiError::Internal(m)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::TargetMissing("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::SourceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::NameConflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::InvalidArgument("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn ws_close_codes() {
        assert_eq!(ApiError::Unauthorized.ws_close_code(), 4401);
        assert_eq!(ApiError::TargetMissing("x".into()).ws_close_code(), 4404);
        assert_eq!(ApiError::TargetGone("x".into()).ws_close_code(), 4410);
        assert_eq!(ApiError::Internal("x".into()).ws_close_code(), 1011);
    }
}
