use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{BattleId, Team, TeamId, TimeMs, UserId};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    pub name: String,
    pub user_id: String,
}

pub async fn create_team(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CreateTeamRequest>,
) -> Result<Json<Team>, AppError> {
    let battle_id = BattleId::new(id);
    let user_id = UserId::new(req.user_id);
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("team name must not be empty".to_string()));
    }

    if state
        .repo
        .get_participant(&battle_id, &user_id)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest(format!(
            "user {} is not a participant of battle {}",
            user_id, battle_id
        )));
    }
    if state.repo.team_name_taken(&battle_id, name).await? {
        return Err(AppError::Conflict(format!(
            "battle already has a team named {:?}",
            name
        )));
    }

    let now = TimeMs::now();
    let team = state.repo.create_team(&battle_id, name, now).await?;
    state.repo.add_team_member(&team, &user_id, now).await?;

    tracing::info!(battle_id = %battle_id, team_id = %team.id, "Team created");
    Ok(Json(team))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTeamRequest {
    pub invite_code: String,
    pub user_id: String,
}

pub async fn join_team(
    State(state): State<AppState>,
    Json(req): Json<JoinTeamRequest>,
) -> Result<Json<Team>, AppError> {
    let user_id = UserId::new(req.user_id);
    let team = state
        .repo
        .find_team_by_invite(req.invite_code.trim())
        .await?
        .ok_or_else(|| AppError::NotFound("no team with that invite code".to_string()))?;

    if state
        .repo
        .get_participant(&team.battle_id, &user_id)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest(format!(
            "user {} is not a participant of battle {}",
            user_id, team.battle_id
        )));
    }

    state
        .repo
        .add_team_member(&team, &user_id, TimeMs::now())
        .await?;
    Ok(Json(team))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveTeamRequest {
    pub user_id: String,
}

pub async fn leave_team(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<LeaveTeamRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let team_id = TeamId::new(id);
    let user_id = UserId::new(req.user_id);
    let team = state
        .repo
        .get_team(&team_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("team {}", team_id)))?;

    let team_deleted = state.repo.remove_team_member(&team, &user_id).await?;
    Ok(Json(serde_json::json!({
        "left": true,
        "teamDeleted": team_deleted,
    })))
}
