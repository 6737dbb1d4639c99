//! Team and membership operations.

use crate::domain::{
    generate_invite_code, BattleId, Team, TeamId, TeamMember, TimeMs, UserId,
    INVITE_CODE_MAX_ATTEMPTS,
};
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Create a team. Invite-code uniqueness is enforced by the database;
    /// on a code collision a fresh code is generated, up to
    /// `INVITE_CODE_MAX_ATTEMPTS` times.
    ///
    /// # Errors
    /// Returns an error if the insert fails for any reason other than an
    /// invite-code collision, including a duplicate team name in the battle.
    pub async fn create_team(
        &self,
        battle_id: &BattleId,
        name: &str,
        created_at: TimeMs,
    ) -> Result<Team, sqlx::Error> {
        let mut last_err: Option<sqlx::Error> = None;

        for attempt in 0..INVITE_CODE_MAX_ATTEMPTS {
            let team = Team {
                id: TeamId::generate(),
                battle_id: battle_id.clone(),
                name: name.to_string(),
                invite_code: generate_invite_code(),
                created_at_ms: created_at,
            };

            let result = sqlx::query(
                r#"
                INSERT INTO teams (id, battle_id, name, invite_code, created_at_ms)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(team.id.as_str())
            .bind(team.battle_id.as_str())
            .bind(&team.name)
            .bind(&team.invite_code)
            .bind(team.created_at_ms.as_i64())
            .execute(self.pool())
            .await;

            match result {
                Ok(_) => return Ok(team),
                Err(e) if is_invite_code_collision(&e) => {
                    warn!(attempt, "Invite code collision, regenerating");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| sqlx::Error::RowNotFound))
    }

    /// Look up a team by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_team(&self, id: &TeamId) -> Result<Option<Team>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, battle_id, name, invite_code, created_at_ms FROM teams WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(map_team_row))
    }

    /// Look up a team by its invite code.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_team_by_invite(&self, code: &str) -> Result<Option<Team>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, battle_id, name, invite_code, created_at_ms FROM teams WHERE invite_code = ?",
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(map_team_row))
    }

    /// Check whether a battle already has a team with this name.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn team_name_taken(
        &self,
        battle_id: &BattleId,
        name: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM teams WHERE battle_id = ? AND name = ?")
                .bind(battle_id.as_str())
                .bind(name)
                .fetch_one(self.pool())
                .await?;
        Ok(row.0 > 0)
    }

    /// All teams of a battle, in creation order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_teams(&self, battle_id: &BattleId) -> Result<Vec<Team>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, battle_id, name, invite_code, created_at_ms
            FROM teams WHERE battle_id = ?
            ORDER BY created_at_ms ASC, id ASC
            "#,
        )
        .bind(battle_id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(map_team_row).collect())
    }

    /// Add a member to a team, idempotently, and point their counter at it.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn add_team_member(
        &self,
        team: &Team,
        user_id: &UserId,
        joined_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, joined_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(team_id, user_id) DO NOTHING
            "#,
        )
        .bind(team.id.as_str())
        .bind(user_id.as_str())
        .bind(joined_at.as_i64())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE counters SET team_id = ? WHERE battle_id = ? AND user_id = ?")
            .bind(team.id.as_str())
            .bind(team.battle_id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a member from a team and detach their counter. The team is
    /// deleted automatically when its last member leaves.
    ///
    /// Returns `true` if the team was deleted as a result.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn remove_team_member(
        &self,
        team: &Team,
        user_id: &UserId,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team.id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE counters SET team_id = NULL WHERE battle_id = ? AND user_id = ? AND team_id = ?",
        )
        .bind(team.battle_id.as_str())
        .bind(user_id.as_str())
        .bind(team.id.as_str())
        .execute(&mut *tx)
        .await?;

        let remaining: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM team_members WHERE team_id = ?")
                .bind(team.id.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let deleted = remaining.0 == 0;
        if deleted {
            sqlx::query("DELETE FROM teams WHERE id = ?")
                .bind(team.id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Members of a team, in join order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_team_members(&self, team_id: &TeamId) -> Result<Vec<TeamMember>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT team_id, user_id, joined_at_ms FROM team_members
            WHERE team_id = ? ORDER BY joined_at_ms ASC, user_id ASC
            "#,
        )
        .bind(team_id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| TeamMember {
                team_id: TeamId::new(r.get("team_id")),
                user_id: UserId::new(r.get("user_id")),
                joined_at_ms: TimeMs::new(r.get("joined_at_ms")),
            })
            .collect())
    }
}

fn is_invite_code_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("invite_code"),
        _ => false,
    }
}

fn map_team_row(row: &sqlx::sqlite::SqliteRow) -> Team {
    Team {
        id: TeamId::new(row.get("id")),
        battle_id: BattleId::new(row.get("battle_id")),
        name: row.get("name"),
        invite_code: row.get("invite_code"),
        created_at_ms: TimeMs::new(row.get("created_at_ms")),
    }
}
