use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::AppState;
use crate::domain::{BattleId, SyncMode, UserId};
use crate::error::AppError;
use crate::orchestration::ReconcileOptions;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub user_id: String,
    /// "quick" (default) or "full". Full forces an unbounded recomputation
    /// when accuracy matters more than latency.
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub count: i64,
    pub is_cheater: bool,
    pub matched: usize,
    pub mode: SyncMode,
}

/// Manual reconciliation. An attempt inside the cooldown window fails fast
/// with HTTP 429 carrying `retryAfterSeconds`.
pub async fn sync_participant(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    let battle_id = BattleId::new(id);
    let user_id = UserId::new(req.user_id);
    let mode = match req.mode.as_deref() {
        None => SyncMode::Quick,
        Some(raw) => SyncMode::from_str(raw)
            .map_err(|_| AppError::BadRequest("mode must be quick or full".to_string()))?,
    };

    let outcome = state
        .reconciler
        .reconcile(
            &battle_id,
            &user_id,
            ReconcileOptions {
                mode,
                bypass_cooldown: false,
            },
        )
        .await?;

    Ok(Json(SyncResponse {
        count: outcome.count,
        is_cheater: outcome.is_cheater,
        matched: outcome.timestamps.len(),
        mode,
    }))
}
