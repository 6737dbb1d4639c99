//! Counter reconciliation: refetch a participant's listening history and
//! recompute their verified counter in full.

use crate::config::Config;
use crate::datasource::{HistoryFetch, HistorySource};
use crate::db::Repository;
use crate::domain::{
    Battle, BattleId, BattleStatus, Counter, Participant, ReconcileOutcome, Scrobble, SyncMode,
    TimeMs, UserId, MAX_TRACKED_TIMESTAMPS,
};
use crate::engine::{cheat, TrackIndex};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Cooldown verdict surfaced to manual-sync callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPermit {
    pub allowed: bool,
    pub retry_after_secs: i64,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("battle not found: {0}")]
    BattleNotFound(BattleId),
    #[error("battle {id} is not active (status: {status})")]
    BattleNotActive { id: BattleId, status: BattleStatus },
    #[error("user {user} is not a participant of battle {battle}")]
    NotParticipant { battle: BattleId, user: UserId },
    #[error("reconciliation on cooldown, retry in {retry_after_secs}s")]
    Cooldown { retry_after_secs: i64 },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ReconcileError {
    /// Rate-limit violations are retryable and carry a wait duration;
    /// everything else is structural.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            ReconcileError::Cooldown { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Options for one reconciliation request.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub mode: SyncMode,
    /// Skip the cooldown check (used by tests and trusted internal callers).
    pub bypass_cooldown: bool,
}

impl ReconcileOptions {
    pub fn quick() -> Self {
        Self {
            mode: SyncMode::Quick,
            bypass_cooldown: false,
        }
    }

    pub fn full() -> Self {
        Self {
            mode: SyncMode::Full,
            bypass_cooldown: false,
        }
    }
}

pub struct Reconciler {
    source: Arc<dyn HistorySource>,
    repo: Arc<Repository>,
    config: Config,
}

impl Reconciler {
    pub fn new(source: Arc<dyn HistorySource>, repo: Arc<Repository>, config: Config) -> Self {
        Self {
            source,
            repo,
            config,
        }
    }

    /// Cooldown verdict for a counter at time `now`.
    pub fn permit(&self, counter: &Counter, now: TimeMs) -> SyncPermit {
        let cooldown_ms = self.config.sync_cooldown_secs * 1000;
        match counter.last_synced_ms {
            Some(last) if now.as_i64() - last.as_i64() < cooldown_ms => {
                let remaining_ms = cooldown_ms - (now.as_i64() - last.as_i64());
                SyncPermit {
                    allowed: false,
                    // Round up so "retry after" never lands inside the window.
                    retry_after_secs: (remaining_ms + 999) / 1000,
                }
            }
            _ => SyncPermit {
                allowed: true,
                retry_after_secs: 0,
            },
        }
    }

    /// Cooldown verdict for a (battle, participant) pair, for callers that
    /// want to surface wait time without attempting a sync.
    pub async fn sync_permit(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
        now: TimeMs,
    ) -> Result<SyncPermit, ReconcileError> {
        let counter = self
            .repo
            .get_counter(battle_id, user_id)
            .await?
            .ok_or_else(|| ReconcileError::NotParticipant {
                battle: battle_id.clone(),
                user: user_id.clone(),
            })?;
        Ok(self.permit(&counter, now))
    }

    /// Reconcile one participant's counter against their listening history.
    ///
    /// Preconditions (checked before any external call): the battle exists
    /// and is active, the user is on its roster, and the cooldown window has
    /// elapsed unless bypassed. Provider failures are absorbed: the counter
    /// simply does not advance that pass.
    pub async fn reconcile(
        &self,
        battle_id: &BattleId,
        user_id: &UserId,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let battle = self
            .repo
            .get_battle(battle_id)
            .await?
            .ok_or_else(|| ReconcileError::BattleNotFound(battle_id.clone()))?;
        if battle.status != BattleStatus::Active {
            return Err(ReconcileError::BattleNotActive {
                id: battle.id.clone(),
                status: battle.status,
            });
        }

        let participant = self
            .repo
            .get_participant(battle_id, user_id)
            .await?
            .ok_or_else(|| ReconcileError::NotParticipant {
                battle: battle_id.clone(),
                user: user_id.clone(),
            })?;

        let now = TimeMs::now();
        let counter = self.require_counter(&battle, &participant, now).await?;

        if !options.bypass_cooldown {
            let permit = self.permit(&counter, now);
            if !permit.allowed {
                return Err(ReconcileError::Cooldown {
                    retry_after_secs: permit.retry_after_secs,
                });
            }
        }

        let lower = battle.history_lower_bound(counter.created_at_ms);
        let upper = battle.history_upper_bound(now);
        let fetch = match self
            .source
            .fetch_history(
                participant.handle.as_str(),
                lower.as_i64(),
                upper.as_i64(),
                &self.config.fetch_options(options.mode),
            )
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    battle_id = %battle.id,
                    user = %participant.user_id,
                    error = %e,
                    "History fetch failed, counter will not advance this pass"
                );
                self.repo
                    .touch_counter_sync(battle_id, user_id, now, options.mode)
                    .await?;
                return Ok(ReconcileOutcome {
                    count: counter.count,
                    is_cheater: counter.is_cheater,
                    timestamps: counter.timestamps,
                });
            }
        };

        self.apply_fetch(&battle, &participant, &counter, &fetch, options.mode, now)
            .await
    }

    /// Reconcile against an already-fetched history (the scheduler's
    /// per-tick reuse path). Cooldown is checked against `now`; a pair on
    /// cooldown yields the cooldown error just like a direct call.
    pub async fn reconcile_with_fetch(
        &self,
        battle: &Battle,
        participant: &Participant,
        fetch: &HistoryFetch,
        mode: SyncMode,
        now: TimeMs,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let counter = self.require_counter(battle, participant, now).await?;
        let permit = self.permit(&counter, now);
        if !permit.allowed {
            return Err(ReconcileError::Cooldown {
                retry_after_secs: permit.retry_after_secs,
            });
        }
        self.apply_fetch(battle, participant, &counter, fetch, mode, now)
            .await
    }

    async fn require_counter(
        &self,
        battle: &Battle,
        participant: &Participant,
        now: TimeMs,
    ) -> Result<Counter, ReconcileError> {
        // Join normally creates the counter; recover if it is missing.
        if let Some(counter) = self
            .repo
            .get_counter(&battle.id, &participant.user_id)
            .await?
        {
            return Ok(counter);
        }
        warn!(
            battle_id = %battle.id,
            user = %participant.user_id,
            "Counter missing for roster participant, recreating"
        );
        let recreated = Participant {
            joined_at_ms: now,
            ..participant.clone()
        };
        self.repo.insert_participant(&recreated).await?;
        self.repo
            .get_counter(&battle.id, &participant.user_id)
            .await?
            .ok_or_else(|| ReconcileError::NotParticipant {
                battle: battle.id.clone(),
                user: participant.user_id.clone(),
            })
    }

    async fn apply_fetch(
        &self,
        battle: &Battle,
        participant: &Participant,
        counter: &Counter,
        fetch: &HistoryFetch,
        mode: SyncMode,
        now: TimeMs,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let tracks = self.repo.query_tracks(&battle.id).await?;
        let index = TrackIndex::new(&tracks);
        let lower = battle.history_lower_bound(counter.created_at_ms);

        let outcome = recompute(&index, &fetch.scrobbles, lower, battle.end_ms);

        // A failed fetch that produced nothing is not evidence of silence;
        // leave the counter as-is rather than zeroing it.
        if fetch.scrobbles.is_empty() && !fetch.complete {
            debug!(
                battle_id = %battle.id,
                user = %participant.user_id,
                "Empty incomplete fetch, skipping persist"
            );
            self.repo
                .touch_counter_sync(&battle.id, &participant.user_id, now, mode)
                .await?;
            return Ok(ReconcileOutcome {
                count: counter.count,
                is_cheater: counter.is_cheater,
                timestamps: counter.timestamps.clone(),
            });
        }

        self.repo
            .persist_reconcile_outcome(&battle.id, &participant.user_id, &outcome, now, mode)
            .await?;

        debug!(
            battle_id = %battle.id,
            user = %participant.user_id,
            count = outcome.count,
            is_cheater = outcome.is_cheater,
            mode = mode.as_str(),
            "Reconciled counter"
        );

        Ok(outcome)
    }
}

/// Full recomputation of a counter from fetched history: defensively
/// re-filter to the countable window, match against the playlist, classify
/// the matched timestamps, and bound the persisted timestamp list.
pub fn recompute(
    index: &TrackIndex,
    scrobbles: &[Scrobble],
    lower: TimeMs,
    end_ms: TimeMs,
) -> ReconcileOutcome {
    let mut timestamps: Vec<TimeMs> = scrobbles
        .iter()
        .filter(|s| s.time_ms >= lower && s.time_ms <= end_ms)
        .filter(|s| index.contains(s))
        .map(|s| s.time_ms)
        .collect();
    timestamps.sort_unstable();

    let count = timestamps.len() as i64;
    let is_cheater = cheat::classify(&timestamps);

    // Classification ran over the full set; keep only the most recent for
    // storage.
    if timestamps.len() > MAX_TRACKED_TIMESTAMPS {
        timestamps.drain(..timestamps.len() - MAX_TRACKED_TIMESTAMPS);
    }

    ReconcileOutcome {
        count,
        is_cheater,
        timestamps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlaylistTrack;

    fn index_of(tracks: &[(&str, &str)]) -> TrackIndex {
        let tracks: Vec<PlaylistTrack> = tracks
            .iter()
            .map(|(t, a)| PlaylistTrack::new(t.to_string(), a.to_string()))
            .collect();
        TrackIndex::new(&tracks)
    }

    fn scrobble(title: &str, artist: &str, ms: i64) -> Scrobble {
        Scrobble::new(title.to_string(), artist.to_string(), TimeMs::new(ms))
    }

    #[test]
    fn test_recompute_counts_only_matching_in_window() {
        let index = index_of(&[("Halo", "Beyoncé")]);
        let scrobbles = vec![
            scrobble("Halo", "Beyoncé", 500),    // before window
            scrobble("Halo", "Beyoncé", 1500),   // counts
            scrobble("Other", "Nobody", 1600),   // non-matching
            scrobble("halo", "BEYONCE", 1700),   // counts (normalized)
            scrobble("Halo", "Beyoncé", 99_999), // after end
        ];

        let outcome = recompute(&index, &scrobbles, TimeMs::new(1000), TimeMs::new(2000));
        assert_eq!(outcome.count, 2);
        assert!(!outcome.is_cheater);
        assert_eq!(outcome.timestamps, vec![TimeMs::new(1500), TimeMs::new(1700)]);
    }

    #[test]
    fn test_recompute_flags_rapid_scrobbling() {
        let index = index_of(&[("Halo", "Beyoncé")]);
        let scrobbles: Vec<Scrobble> = (0..5)
            .map(|i| scrobble("Halo", "Beyoncé", 1000 + i * 1000))
            .collect();

        let outcome = recompute(&index, &scrobbles, TimeMs::new(0), TimeMs::new(100_000));
        assert_eq!(outcome.count, 5);
        assert!(outcome.is_cheater);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let index = index_of(&[("Halo", "Beyoncé")]);
        let scrobbles: Vec<Scrobble> = (0..20)
            .map(|i| scrobble("Halo", "Beyoncé", i * 60_000))
            .collect();

        let a = recompute(&index, &scrobbles, TimeMs::new(0), TimeMs::new(10_000_000));
        let b = recompute(&index, &scrobbles, TimeMs::new(0), TimeMs::new(10_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn test_recompute_bounds_stored_timestamps() {
        let index = index_of(&[("Halo", "Beyoncé")]);
        let scrobbles: Vec<Scrobble> = (0..(MAX_TRACKED_TIMESTAMPS as i64 + 50))
            .map(|i| scrobble("Halo", "Beyoncé", i * 60_000))
            .collect();

        let outcome = recompute(&index, &scrobbles, TimeMs::new(0), TimeMs::new(i64::MAX));
        assert_eq!(outcome.count, MAX_TRACKED_TIMESTAMPS as i64 + 50);
        assert_eq!(outcome.timestamps.len(), MAX_TRACKED_TIMESTAMPS);
        // Most recent kept.
        assert_eq!(
            outcome.timestamps.last().copied(),
            Some(TimeMs::new((MAX_TRACKED_TIMESTAMPS as i64 + 49) * 60_000))
        );
    }
}
