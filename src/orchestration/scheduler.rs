//! Lifecycle scheduler: the periodic driver that promotes battles across
//! states, freezes leaderboards exactly once on expiry, and reconciles every
//! active participant.
//!
//! Ticks are idempotent and safe to run from multiple worker processes:
//! promotion and freeze are status-guarded writes, and the participant list
//! is partitioned deterministically across `(shard_id, total_shards)`.

use crate::config::Config;
use crate::datasource::{HistoryFetch, HistorySource};
use crate::db::Repository;
use crate::domain::{
    Battle, BattleStatus, ListenHandle, Participant, SyncMode, TeamId, TimeMs, UserId,
};
use crate::engine::leaderboard::{self, LeaderboardEntry};
use crate::orchestration::cache::TtlCache;
use crate::orchestration::reconciler::{ReconcileError, Reconciler};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// What one tick did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub promoted: u64,
    pub frozen: usize,
    pub reconciled: usize,
    pub skipped: usize,
}

/// Deterministic index-modulo partition of the deduplicated handle list.
///
/// Given the same ordering, shard assignments are disjoint and their union
/// covers the full list. Ordering is only guaranteed within one tick; every
/// tick recomputes the list fresh.
pub fn shard_handles(
    handles: &[ListenHandle],
    shard_id: u32,
    total_shards: u32,
) -> Vec<ListenHandle> {
    handles
        .iter()
        .enumerate()
        .filter(|(i, _)| (*i as u32) % total_shards == shard_id)
        .map(|(_, h)| h.clone())
        .collect()
}

pub struct Scheduler {
    repo: Arc<Repository>,
    reconciler: Arc<Reconciler>,
    source: Arc<dyn HistorySource>,
    config: Config,
    /// Per-tick reuse of a handle's fetched history across battles.
    history_cache: TtlCache<ListenHandle, HistoryFetch>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<Repository>,
        reconciler: Arc<Reconciler>,
        source: Arc<dyn HistorySource>,
        config: Config,
    ) -> Self {
        let ttl = Duration::from_secs(config.tick_interval_secs.max(1));
        Self {
            repo,
            reconciler,
            source,
            config,
            history_cache: TtlCache::new(ttl, 1024),
        }
    }

    /// Run ticks forever on the configured interval. A slow tick delays the
    /// next one instead of stacking concurrent ticks in this process.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(summary) => debug!(
                    promoted = summary.promoted,
                    frozen = summary.frozen,
                    reconciled = summary.reconciled,
                    skipped = summary.skipped,
                    "Scheduler tick complete"
                ),
                Err(e) => error!(error = %e, "Scheduler tick failed"),
            }
        }
    }

    /// One scheduler pass: promote, freeze, reconcile.
    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        let now = TimeMs::now();
        let mut summary = TickSummary {
            promoted: self.repo.promote_started_battles(now).await?,
            ..TickSummary::default()
        };
        if summary.promoted > 0 {
            info!(count = summary.promoted, "Promoted battles to active");
        }

        let mut live: Vec<Battle> = Vec::new();
        for battle in self.repo.query_battles_by_status(BattleStatus::Active).await? {
            if battle.has_expired(now) {
                if self.freeze(&battle, now).await? {
                    summary.frozen += 1;
                }
            } else {
                live.push(battle);
            }
        }

        let (reconciled, skipped) = self.reconcile_live_battles(&live, now).await?;
        summary.reconciled = reconciled;
        summary.skipped = skipped;
        Ok(summary)
    }

    /// Freeze an expired battle: snapshot the live leaderboard and flip the
    /// status in one guarded write. Returns whether this worker won.
    async fn freeze(&self, battle: &Battle, now: TimeMs) -> Result<bool, SchedulerError> {
        let entries = build_live_leaderboard(&self.repo, battle).await?;
        let snapshot =
            serde_json::to_value(&entries).unwrap_or_else(|_| serde_json::Value::Array(vec![]));

        let frozen = self.repo.freeze_battle(&battle.id, &snapshot, now).await?;
        if frozen {
            info!(battle_id = %battle.id, entries = entries.len(), "Battle ended, leaderboard frozen");
        } else {
            debug!(battle_id = %battle.id, "Battle already ended, freeze skipped");
        }
        Ok(frozen)
    }

    /// Reconcile every participant of the live battles assigned to this
    /// shard. Participants appearing in several battles are fetched once and
    /// the history reused; each reconciliation is an independent unit of
    /// work and one failure never aborts the batch.
    async fn reconcile_live_battles(
        &self,
        battles: &[Battle],
        now: TimeMs,
    ) -> Result<(usize, usize), SchedulerError> {
        // Deduplicate across battles by external identity, deterministically
        // ordered so every shard sees the same enumeration.
        let mut by_handle: BTreeMap<ListenHandle, Vec<(Battle, Participant)>> = BTreeMap::new();
        for battle in battles {
            for participant in self.repo.query_participants(&battle.id).await? {
                by_handle
                    .entry(participant.handle.clone())
                    .or_default()
                    .push((battle.clone(), participant));
            }
        }

        let handles: Vec<ListenHandle> = by_handle.keys().cloned().collect();
        let assigned = shard_handles(&handles, self.config.shard_id, self.config.total_shards);

        let tasks = assigned.into_iter().map(|handle| {
            let units = by_handle.remove(&handle).unwrap_or_default();
            self.reconcile_handle(handle, units, now)
        });

        let mut reconciled = 0usize;
        let mut skipped = 0usize;
        for (r, s) in join_all(tasks).await {
            reconciled += r;
            skipped += s;
        }
        Ok((reconciled, skipped))
    }

    /// Fetch one handle's history (or reuse this tick's cached fetch) and
    /// reconcile each of their battle entries against it.
    async fn reconcile_handle(
        &self,
        handle: ListenHandle,
        units: Vec<(Battle, Participant)>,
        now: TimeMs,
    ) -> (usize, usize) {
        if units.is_empty() {
            return (0, 0);
        }

        let fetch = match self.history_cache.get(&handle) {
            Some(cached) => cached,
            None => {
                // One window wide enough for every battle this handle is in;
                // the reconciler re-filters per battle.
                let lower = units
                    .iter()
                    .map(|(b, _)| b.start_ms.as_i64())
                    .min()
                    .unwrap_or(0);
                match self
                    .source
                    .fetch_history(
                        handle.as_str(),
                        lower,
                        now.as_i64(),
                        &self.config.fetch_options(SyncMode::Quick),
                    )
                    .await
                {
                    Ok(f) => {
                        self.history_cache.insert(handle.clone(), f.clone());
                        f
                    }
                    Err(e) => {
                        warn!(handle = %handle, error = %e, "History fetch failed, skipping handle this tick");
                        return (0, units.len());
                    }
                }
            }
        };

        let mut reconciled = 0usize;
        let mut skipped = 0usize;
        for (battle, participant) in &units {
            match self
                .reconciler
                .reconcile_with_fetch(battle, participant, &fetch, SyncMode::Quick, now)
                .await
            {
                Ok(_) => reconciled += 1,
                Err(ReconcileError::Cooldown { retry_after_secs }) => {
                    debug!(
                        battle_id = %battle.id,
                        user = %participant.user_id,
                        retry_after_secs,
                        "Reconciliation on cooldown, skipped"
                    );
                    skipped += 1;
                }
                Err(e) => {
                    warn!(
                        battle_id = %battle.id,
                        user = %participant.user_id,
                        error = %e,
                        "Reconciliation failed"
                    );
                    skipped += 1;
                }
            }
        }
        (reconciled, skipped)
    }
}

/// Aggregate the current counters of a battle into ranked entries. Used for
/// live reads and as the input to the one-time freeze.
pub async fn build_live_leaderboard(
    repo: &Repository,
    battle: &Battle,
) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    let participants = repo.query_participants(&battle.id).await?;
    let teams = repo.query_teams(&battle.id).await?;
    let counters: HashMap<UserId, (i64, bool, Option<TeamId>)> = repo
        .query_counters(&battle.id)
        .await?
        .into_iter()
        .map(|c| (c.user_id.clone(), (c.count, c.is_cheater, c.team_id)))
        .collect();

    Ok(leaderboard::build(&participants, &counters, &teams))
}
