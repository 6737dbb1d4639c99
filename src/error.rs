use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::orchestration::ReconcileError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Rate limited, retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: i64 },
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::BattleNotFound(id) => AppError::NotFound(format!("battle {}", id)),
            ReconcileError::NotParticipant { .. } => AppError::BadRequest(err.to_string()),
            ReconcileError::BattleNotActive { .. } => AppError::Conflict(err.to_string()),
            ReconcileError::Cooldown { retry_after_secs } => {
                AppError::TooManyRequests { retry_after_secs }
            }
            ReconcileError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::TooManyRequests { retry_after_secs } => {
                // The cooldown signal: callers surface the wait to the user.
                let body = Json(json!({
                    "error": "sync on cooldown",
                    "allowed": false,
                    "retryAfterSeconds": retry_after_secs,
                }));
                (StatusCode::TOO_MANY_REQUESTS, body).into_response()
            }
            other => {
                let (status, error_message) = match other {
                    AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
                    AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                    AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
                    AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
                    AppError::TooManyRequests { .. } => unreachable!(),
                };

                let body = Json(json!({
                    "error": error_message,
                }));

                (status, body).into_response()
            }
        }
    }
}
