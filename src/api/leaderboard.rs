use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::domain::{BattleId, BattleStatus};
use crate::engine::LeaderboardEntry;
use crate::error::AppError;
use crate::orchestration::build_live_leaderboard;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub battle_id: String,
    pub status: BattleStatus,
    pub frozen: bool,
    pub entries: serde_json::Value,
}

/// For an ended battle the frozen snapshot is returned verbatim; it is never
/// recomputed from live counters.
pub async fn get_leaderboard(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let battle_id = BattleId::new(id);
    let battle = state
        .repo
        .get_battle(&battle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("battle {}", battle_id)))?;

    let (frozen, entries) = match (battle.status, battle.final_leaderboard.clone()) {
        (BattleStatus::Ended, Some(snapshot)) => (true, snapshot),
        (BattleStatus::Ended, None) => {
            // Ended but no snapshot persisted: surface the inconsistency
            // rather than silently recomputing.
            return Err(AppError::Internal(format!(
                "battle {} ended without a frozen leaderboard",
                battle_id
            )));
        }
        _ => {
            let live: Vec<LeaderboardEntry> = build_live_leaderboard(&state.repo, &battle).await?;
            (false, serde_json::to_value(live).map_err(|e| AppError::Internal(e.to_string()))?)
        }
    };

    Ok(Json(LeaderboardResponse {
        battle_id: battle_id.as_str().to_string(),
        status: battle.status,
        frozen,
        entries,
    }))
}
