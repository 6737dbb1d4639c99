use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{
    Battle, BattleId, BattleStatus, EndTimeExtension, ListenHandle, Participant, PlaylistTrack,
    TimeMs, UserId,
};
use crate::engine::matcher;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInput {
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBattleRequest {
    pub host: String,
    pub name: String,
    pub playlist_url: Option<String>,
    pub playlist: Vec<TrackInput>,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleResponse {
    pub id: String,
    pub host: String,
    pub name: String,
    pub playlist_url: Option<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub status: BattleStatus,
    pub ended_at_ms: Option<i64>,
    pub track_count: usize,
}

impl BattleResponse {
    fn from_battle(battle: &Battle, track_count: usize) -> Self {
        Self {
            id: battle.id.as_str().to_string(),
            host: battle.host.as_str().to_string(),
            name: battle.name.clone(),
            playlist_url: battle.playlist_url.clone(),
            start_ms: battle.start_ms.as_i64(),
            end_ms: battle.end_ms.as_i64(),
            status: battle.status,
            ended_at_ms: battle.ended_at_ms.map(|t| t.as_i64()),
            track_count,
        }
    }
}

pub async fn create_battle(
    State(state): State<AppState>,
    Json(req): Json<CreateBattleRequest>,
) -> Result<Json<BattleResponse>, AppError> {
    if req.playlist.is_empty() {
        return Err(AppError::BadRequest("playlist must not be empty".to_string()));
    }
    if req.start_ms >= req.end_ms {
        return Err(AppError::BadRequest("startMs must be < endMs".to_string()));
    }

    let now = TimeMs::now();
    let battle = Battle {
        id: BattleId::generate(),
        host: UserId::new(req.host),
        name: req.name,
        playlist_url: req.playlist_url,
        start_ms: TimeMs::new(req.start_ms),
        end_ms: TimeMs::new(req.end_ms),
        status: if now.as_i64() >= req.start_ms {
            BattleStatus::Active
        } else {
            BattleStatus::Upcoming
        },
        ended_at_ms: None,
        final_leaderboard: None,
        created_at_ms: now,
    };

    // The matching corpus is immutable once attached; normalize it now so
    // every later reconciliation pass skips that work.
    let mut tracks: Vec<PlaylistTrack> = req
        .playlist
        .into_iter()
        .map(|t| PlaylistTrack::new(t.title, t.artist))
        .collect();
    matcher::precompute_normalized(&mut tracks);

    state.repo.insert_battle(&battle, &tracks).await?;
    tracing::info!(battle_id = %battle.id, tracks = tracks.len(), "Battle created");

    Ok(Json(BattleResponse::from_battle(&battle, tracks.len())))
}

pub async fn get_battle(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BattleResponse>, AppError> {
    let battle_id = BattleId::new(id);
    let battle = state
        .repo
        .get_battle(&battle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("battle {}", battle_id)))?;
    let tracks = state.repo.query_tracks(&battle_id).await?;

    Ok(Json(BattleResponse::from_battle(&battle, tracks.len())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    pub new_end_ms: i64,
    pub actor: String,
    pub reason: Option<String>,
}

pub async fn extend_battle(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<EndTimeExtension>, AppError> {
    let battle_id = BattleId::new(id);
    let battle = state
        .repo
        .get_battle(&battle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("battle {}", battle_id)))?;

    if req.new_end_ms <= battle.end_ms.as_i64() {
        return Err(AppError::BadRequest(
            "newEndMs must be later than the current end time".to_string(),
        ));
    }

    let extension = state
        .repo
        .extend_end_time(
            &battle_id,
            TimeMs::new(req.new_end_ms),
            &UserId::new(req.actor),
            req.reason.as_deref(),
            TimeMs::now(),
        )
        .await?
        .ok_or_else(|| {
            AppError::Conflict("cannot extend a battle that has already ended".to_string())
        })?;

    tracing::info!(
        battle_id = %battle_id,
        new_end_ms = req.new_end_ms,
        "Battle end time extended"
    );
    Ok(Json(extension))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: String,
    pub handle: String,
}

pub async fn join_battle(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<Participant>, AppError> {
    let battle_id = BattleId::new(id);
    let battle = state
        .repo
        .get_battle(&battle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("battle {}", battle_id)))?;
    if battle.status == BattleStatus::Ended {
        return Err(AppError::Conflict("battle has already ended".to_string()));
    }

    let participant = Participant {
        battle_id,
        user_id: UserId::new(req.user_id),
        handle: ListenHandle::new(req.handle),
        joined_at_ms: TimeMs::now(),
    };
    state.repo.insert_participant(&participant).await?;

    Ok(Json(participant))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub user_id: String,
}

pub async fn leave_battle(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<LeaveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let battle_id = BattleId::new(id);
    let user_id = UserId::new(req.user_id);

    let removed = state.repo.remove_participant(&battle_id, &user_id).await?;
    if !removed {
        return Err(AppError::NotFound(format!(
            "user {} is not a participant of battle {}",
            user_id, battle_id
        )));
    }

    Ok(Json(serde_json::json!({"removed": true})))
}
