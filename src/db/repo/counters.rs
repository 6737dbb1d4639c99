//! Participant roster and reconciliation counter operations.

use crate::domain::{
    BattleId, Counter, ListenHandle, Participant, ReconcileOutcome, SyncMode, TeamId, TimeMs,
    UserId,
};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Add a participant to a battle roster and create their counter, both
    /// idempotently. The counter's `created_at_ms` is the history checkpoint.
    ///
    /// Returns `true` if the participant was newly added.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_participant(&self, participant: &Participant) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO participants (battle_id, user_id, handle, joined_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(battle_id, user_id) DO NOTHING
            "#,
        )
        .bind(participant.battle_id.as_str())
        .bind(participant.user_id.as_str())
        .bind(participant.handle.as_str())
        .bind(participant.joined_at_ms.as_i64())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO counters (battle_id, user_id, created_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(battle_id, user_id) DO NOTHING
            "#,
        )
        .bind(participant.battle_id.as_str())
        .bind(participant.user_id.as_str())
        .bind(participant.joined_at_ms.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a participant from a battle. Deletes their counter and any
    /// team membership within that battle; this is the only path that
    /// deletes a counter.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn remove_participant(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            DELETE FROM team_members
            WHERE user_id = ?
              AND team_id IN (SELECT id FROM teams WHERE battle_id = ?)
            "#,
        )
        .bind(user_id.as_str())
        .bind(battle_id.as_str())
        .execute(&mut *tx)
        .await?;

        // Teams emptied by this removal are deleted.
        sqlx::query(
            r#"
            DELETE FROM teams
            WHERE battle_id = ?
              AND id NOT IN (SELECT DISTINCT team_id FROM team_members)
            "#,
        )
        .bind(battle_id.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM counters WHERE battle_id = ? AND user_id = ?")
            .bind(battle_id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM participants WHERE battle_id = ? AND user_id = ?")
            .bind(battle_id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load the roster of a battle, in join order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_participants(
        &self,
        battle_id: &BattleId,
    ) -> Result<Vec<Participant>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT battle_id, user_id, handle, joined_at_ms
            FROM participants WHERE battle_id = ?
            ORDER BY joined_at_ms ASC, user_id ASC
            "#,
        )
        .bind(battle_id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(map_participant_row).collect())
    }

    /// Get a single roster entry.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_participant(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT battle_id, user_id, handle, joined_at_ms
            FROM participants WHERE battle_id = ? AND user_id = ?
            "#,
        )
        .bind(battle_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(map_participant_row))
    }

    /// Get the counter for a (battle, participant) pair.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_counter(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
    ) -> Result<Option<Counter>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT battle_id, user_id, count, is_cheater, timestamps, team_id,
                   created_at_ms, last_synced_ms, last_sync_mode
            FROM counters WHERE battle_id = ? AND user_id = ?
            "#,
        )
        .bind(battle_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(map_counter_row))
    }

    /// Load all counters for a battle.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_counters(&self, battle_id: &BattleId) -> Result<Vec<Counter>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT battle_id, user_id, count, is_cheater, timestamps, team_id,
                   created_at_ms, last_synced_ms, last_sync_mode
            FROM counters WHERE battle_id = ?
            ORDER BY user_id ASC
            "#,
        )
        .bind(battle_id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(map_counter_row).collect())
    }

    /// Persist one reconciliation outcome. A rerun with identical inputs
    /// overwrites with identical outputs (idempotent, last write wins).
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn persist_reconcile_outcome(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
        outcome: &ReconcileOutcome,
        synced_at: TimeMs,
        mode: SyncMode,
    ) -> Result<(), sqlx::Error> {
        let timestamps_json = serde_json::to_string(
            &outcome.timestamps.iter().map(|t| t.as_i64()).collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            UPDATE counters
            SET count = ?, is_cheater = ?, timestamps = ?,
                last_synced_ms = ?, last_sync_mode = ?
            WHERE battle_id = ? AND user_id = ?
            "#,
        )
        .bind(outcome.count)
        .bind(outcome.is_cheater)
        .bind(timestamps_json)
        .bind(synced_at.as_i64())
        .bind(mode.as_str())
        .bind(battle_id.as_str())
        .bind(user_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Record a sync attempt time without touching the computed fields.
    /// Used when a pass completed but produced nothing persistable.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn touch_counter_sync(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
        synced_at: TimeMs,
        mode: SyncMode,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE counters SET last_synced_ms = ?, last_sync_mode = ?
            WHERE battle_id = ? AND user_id = ?
            "#,
        )
        .bind(synced_at.as_i64())
        .bind(mode.as_str())
        .bind(battle_id.as_str())
        .bind(user_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Assign or clear the team of a participant's counter.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_counter_team(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
        team_id: Option<&TeamId>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE counters SET team_id = ? WHERE battle_id = ? AND user_id = ?")
            .bind(team_id.map(|t| t.as_str()))
            .bind(battle_id.as_str())
            .bind(user_id.as_str())
            .execute(self.pool())
            .await?;

        Ok(())
    }
}

fn map_participant_row(row: &sqlx::sqlite::SqliteRow) -> Participant {
    Participant {
        battle_id: BattleId::new(row.get("battle_id")),
        user_id: UserId::new(row.get("user_id")),
        handle: ListenHandle::new(row.get("handle")),
        joined_at_ms: TimeMs::new(row.get("joined_at_ms")),
    }
}

fn map_counter_row(row: &sqlx::sqlite::SqliteRow) -> Counter {
    let timestamps_json: String = row.get("timestamps");
    let timestamps: Vec<TimeMs> = match serde_json::from_str::<Vec<i64>>(&timestamps_json) {
        Ok(values) => values.into_iter().map(TimeMs::new).collect(),
        Err(e) => {
            warn!("Dropping unparseable counter timestamps: {}", e);
            Vec::new()
        }
    };

    let last_sync_mode = row
        .get::<Option<String>, _>("last_sync_mode")
        .and_then(|s| SyncMode::from_str(&s).ok());

    Counter {
        battle_id: BattleId::new(row.get("battle_id")),
        user_id: UserId::new(row.get("user_id")),
        count: row.get("count"),
        is_cheater: row.get("is_cheater"),
        timestamps,
        team_id: row.get::<Option<String>, _>("team_id").map(TeamId::new),
        created_at_ms: TimeMs::new(row.get("created_at_ms")),
        last_synced_ms: row.get::<Option<i64>, _>("last_synced_ms").map(TimeMs::new),
        last_sync_mode,
    }
}
