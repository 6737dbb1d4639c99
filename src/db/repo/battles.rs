//! Battle lifecycle, playlist track, and end-time extension operations.

use crate::domain::{
    Battle, BattleId, BattleStatus, EndTimeExtension, PlaylistTrack, TimeMs, UserId,
};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Insert a new battle together with its playlist tracks.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_battle(
        &self,
        battle: &Battle,
        tracks: &[PlaylistTrack],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO battles (
                id, host, name, playlist_url, start_ms, end_ms, status,
                ended_at_ms, final_leaderboard, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(battle.id.as_str())
        .bind(battle.host.as_str())
        .bind(&battle.name)
        .bind(battle.playlist_url.as_deref())
        .bind(battle.start_ms.as_i64())
        .bind(battle.end_ms.as_i64())
        .bind(battle.status.as_str())
        .bind(battle.ended_at_ms.map(|t| t.as_i64()))
        .bind(battle.final_leaderboard.as_ref().map(|v| v.to_string()))
        .bind(battle.created_at_ms.as_i64())
        .execute(&mut *tx)
        .await?;

        for (position, track) in tracks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO battle_tracks (
                    battle_id, position, title, artist, normalized_title, normalized_artist
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(battle.id.as_str())
            .bind(position as i64)
            .bind(&track.title)
            .bind(&track.artist)
            .bind(track.normalized_title.as_deref())
            .bind(track.normalized_artist.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a single battle by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_battle(&self, id: &BattleId) -> Result<Option<Battle>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, host, name, playlist_url, start_ms, end_ms, status,
                   ended_at_ms, final_leaderboard, created_at_ms
            FROM battles WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.and_then(|r| map_battle_row(&r)))
    }

    /// Query battles in a given status.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_battles_by_status(
        &self,
        status: BattleStatus,
    ) -> Result<Vec<Battle>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, host, name, playlist_url, start_ms, end_ms, status,
                   ended_at_ms, final_leaderboard, created_at_ms
            FROM battles WHERE status = ?
            ORDER BY start_ms ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().filter_map(map_battle_row).collect())
    }

    /// Load the playlist corpus for a battle, in playlist order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_tracks(&self, id: &BattleId) -> Result<Vec<PlaylistTrack>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT title, artist, normalized_title, normalized_artist
            FROM battle_tracks WHERE battle_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| PlaylistTrack {
                title: r.get("title"),
                artist: r.get("artist"),
                normalized_title: r.get("normalized_title"),
                normalized_artist: r.get("normalized_artist"),
            })
            .collect())
    }

    /// Promote every upcoming battle whose start time has passed to active.
    ///
    /// Returns the number of promoted battles. The status predicate lives in
    /// the UPDATE itself, so concurrent ticks cannot double-promote.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn promote_started_battles(&self, now: TimeMs) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE battles SET status = 'active'
            WHERE status = 'upcoming' AND start_ms <= ?
            "#,
        )
        .bind(now.as_i64())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Transition an active battle to ended and persist its frozen
    /// leaderboard in one status-guarded write.
    ///
    /// Returns `true` if this call performed the freeze, `false` if the
    /// battle was not active anymore (already frozen by another worker).
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn freeze_battle(
        &self,
        id: &BattleId,
        final_leaderboard: &serde_json::Value,
        ended_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE battles
            SET status = 'ended', final_leaderboard = ?, ended_at_ms = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(final_leaderboard.to_string())
        .bind(ended_at.as_i64())
        .bind(id.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Extend a battle's end time, appending to the extension history.
    ///
    /// Returns the recorded extension, or `None` if the battle does not
    /// exist or has already ended (end times are immutable after ending).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn extend_end_time(
        &self,
        id: &BattleId,
        new_end_ms: TimeMs,
        actor: &UserId,
        reason: Option<&str>,
        now: TimeMs,
    ) -> Result<Option<EndTimeExtension>, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT end_ms FROM battles WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let previous_end_ms: i64 = match row {
            Some(r) => r.get("end_ms"),
            None => return Ok(None),
        };

        // End times are immutable after ending; the status guard on the
        // write decides, so a battle frozen since the read above lands here
        // with no row updated and no extension appended.
        let updated = sqlx::query("UPDATE battles SET end_ms = ? WHERE id = ? AND status != 'ended'")
            .bind(new_end_ms.as_i64())
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO battle_extensions (
                battle_id, previous_end_ms, new_end_ms, actor, reason, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(previous_end_ms)
        .bind(new_end_ms.as_i64())
        .bind(actor.as_str())
        .bind(reason)
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(EndTimeExtension {
            previous_end_ms: TimeMs::new(previous_end_ms),
            new_end_ms,
            actor: actor.clone(),
            reason: reason.map(str::to_string),
            created_at_ms: now,
        }))
    }

    /// Load the append-only extension history for a battle, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_extensions(
        &self,
        id: &BattleId,
    ) -> Result<Vec<EndTimeExtension>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT previous_end_ms, new_end_ms, actor, reason, created_at_ms
            FROM battle_extensions WHERE battle_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| EndTimeExtension {
                previous_end_ms: TimeMs::new(r.get("previous_end_ms")),
                new_end_ms: TimeMs::new(r.get("new_end_ms")),
                actor: UserId::new(r.get("actor")),
                reason: r.get("reason"),
                created_at_ms: TimeMs::new(r.get("created_at_ms")),
            })
            .collect())
    }
}

fn map_battle_row(row: &sqlx::sqlite::SqliteRow) -> Option<Battle> {
    let status_str: String = row.get("status");
    let status = match BattleStatus::from_str(&status_str) {
        Ok(s) => s,
        Err(e) => {
            warn!("Skipping battle row with bad status: {}", e);
            return None;
        }
    };

    let final_leaderboard = row
        .get::<Option<String>, _>("final_leaderboard")
        .and_then(|s| match serde_json::from_str(&s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Skipping unparseable final_leaderboard: {}", e);
                None
            }
        });

    Some(Battle {
        id: BattleId::new(row.get("id")),
        host: UserId::new(row.get("host")),
        name: row.get("name"),
        playlist_url: row.get("playlist_url"),
        start_ms: TimeMs::new(row.get("start_ms")),
        end_ms: TimeMs::new(row.get("end_ms")),
        status,
        ended_at_ms: row.get::<Option<i64>, _>("ended_at_ms").map(TimeMs::new),
        final_leaderboard,
        created_at_ms: TimeMs::new(row.get("created_at_ms")),
    })
}
