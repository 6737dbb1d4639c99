use std::sync::Arc;
use streamclash::config::Config;
use streamclash::datasource::{HistorySource, MockHistorySource};
use streamclash::db::init_db;
use streamclash::domain::{
    Battle, BattleId, BattleStatus, ListenHandle, Participant, PlaylistTrack, Scrobble, TimeMs,
    UserId,
};
use streamclash::engine::matcher;
use streamclash::orchestration::{Reconciler, Scheduler};
use streamclash::Repository;
use tempfile::TempDir;

async fn setup_repo() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

fn test_config(shard_id: u32, total_shards: u32) -> Config {
    Config {
        port: 0,
        database_path: ":memory:".to_string(),
        lastfm_api_url: "http://example.invalid".to_string(),
        lastfm_api_key: "test".to_string(),
        tick_interval_secs: 60,
        sync_cooldown_secs: 0,
        quick_max_pages: 2,
        inter_request_delay_ms: 0,
        request_timeout_secs: 5,
        shard_id,
        total_shards,
    }
}

fn scheduler_with(
    repo: Arc<Repository>,
    source: Arc<MockHistorySource>,
    config: Config,
) -> Scheduler {
    let reconciler = Arc::new(Reconciler::new(
        source.clone() as Arc<dyn HistorySource>,
        repo.clone(),
        config.clone(),
    ));
    Scheduler::new(repo, reconciler, source, config)
}

fn playlist() -> Vec<PlaylistTrack> {
    let mut tracks = vec![PlaylistTrack::new("Halo".to_string(), "Beyoncé".to_string())];
    matcher::precompute_normalized(&mut tracks);
    tracks
}

async fn seed_battle(
    repo: &Repository,
    id: &str,
    status: BattleStatus,
    start: i64,
    end: i64,
) -> BattleId {
    let battle = Battle {
        id: BattleId::new(id.to_string()),
        host: UserId::new("host".to_string()),
        name: id.to_string(),
        playlist_url: None,
        start_ms: TimeMs::new(start),
        end_ms: TimeMs::new(end),
        status,
        ended_at_ms: None,
        final_leaderboard: None,
        created_at_ms: TimeMs::new(start),
    };
    repo.insert_battle(&battle, &playlist()).await.unwrap();
    battle.id
}

async fn seed_participant(
    repo: &Repository,
    battle_id: &BattleId,
    user: &str,
    handle: &str,
    joined_at: i64,
) -> UserId {
    let p = Participant {
        battle_id: battle_id.clone(),
        user_id: UserId::new(user.to_string()),
        handle: ListenHandle::new(handle.to_string()),
        joined_at_ms: TimeMs::new(joined_at),
    };
    repo.insert_participant(&p).await.unwrap();
    p.user_id
}

fn scrobble(ms: i64) -> Scrobble {
    Scrobble::new("Halo".to_string(), "Beyoncé".to_string(), TimeMs::new(ms))
}

#[tokio::test]
async fn test_tick_promotes_started_battles_once() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let id = seed_battle(&repo, "b1", BattleStatus::Upcoming, now - 10_000, now + 100_000).await;
    // Not yet due: stays upcoming.
    seed_battle(&repo, "b2", BattleStatus::Upcoming, now + 500_000, now + 600_000).await;

    let scheduler = scheduler_with(repo.clone(), Arc::new(MockHistorySource::new()), test_config(0, 1));

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.promoted, 1);
    let battle = repo.get_battle(&id).await.unwrap().unwrap();
    assert_eq!(battle.status, BattleStatus::Active);

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.promoted, 0, "promotion is a one-way transition");
}

#[tokio::test]
async fn test_expired_battle_frozen_exactly_once() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let id = seed_battle(&repo, "b1", BattleStatus::Active, now - 200_000, now - 10_000).await;
    let user = seed_participant(&repo, &id, "u1", "u1-fm", now - 190_000).await;

    let mock = Arc::new(MockHistorySource::new());
    let worker_a = scheduler_with(repo.clone(), mock.clone(), test_config(0, 1));
    let worker_b = scheduler_with(repo.clone(), mock.clone(), test_config(0, 1));

    // Two workers racing over the same expired battle: one wins the
    // status-guarded write, the other sees it already ended.
    let (a, b) = tokio::join!(worker_a.tick(), worker_b.tick());
    let total_frozen = a.unwrap().frozen + b.unwrap().frozen;
    assert_eq!(total_frozen, 1);

    let battle = repo.get_battle(&id).await.unwrap().unwrap();
    assert_eq!(battle.status, BattleStatus::Ended);
    assert!(battle.ended_at_ms.is_some());

    // Snapshot includes zero-count roster entries.
    let snapshot = battle.final_leaderboard.expect("snapshot must be written");
    let entries = snapshot.as_array().expect("snapshot is a JSON array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["userId"], user.as_str());
    assert_eq!(entries[0]["count"], 0);

    // A later tick leaves the snapshot alone.
    let summary = worker_a.tick().await.unwrap();
    assert_eq!(summary.frozen, 0);
}

#[tokio::test]
async fn test_tick_reconciles_active_participants() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let id = seed_battle(&repo, "b1", BattleStatus::Active, now - 100_000, now + 100_000).await;
    let user = seed_participant(&repo, &id, "u1", "u1-fm", now - 90_000).await;

    let mock = Arc::new(MockHistorySource::new().with_history(
        "u1-fm",
        vec![scrobble(now - 50_000), scrobble(now - 10_000)],
    ));
    let scheduler = scheduler_with(repo.clone(), mock, test_config(0, 1));

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.reconciled, 1);
    assert_eq!(summary.skipped, 0);

    let counter = repo.get_counter(&id, &user).await.unwrap().unwrap();
    assert_eq!(counter.count, 2);
}

#[tokio::test]
async fn test_handle_in_two_battles_fetched_once_per_tick() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let b1 = seed_battle(&repo, "b1", BattleStatus::Active, now - 100_000, now + 100_000).await;
    let b2 = seed_battle(&repo, "b2", BattleStatus::Active, now - 80_000, now + 100_000).await;
    let u1 = seed_participant(&repo, &b1, "u1", "shared-fm", now - 90_000).await;
    let u2 = seed_participant(&repo, &b2, "u1", "shared-fm", now - 50_000).await;

    let mock = Arc::new(
        MockHistorySource::new().with_history("shared-fm", vec![scrobble(now - 60_000)]),
    );
    let scheduler = scheduler_with(repo.clone(), mock.clone(), test_config(0, 1));

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.reconciled, 2);
    assert_eq!(mock.fetch_calls(), 1, "shared handle is fetched once and reused");

    // Each battle still applies its own countable window. b2's participant
    // joined after the scrobble, so only b1 counts it.
    let c1 = repo.get_counter(&b1, &u1).await.unwrap().unwrap();
    let c2 = repo.get_counter(&b2, &u2).await.unwrap().unwrap();
    assert_eq!(c1.count, 1);
    assert_eq!(c2.count, 0);
}

#[tokio::test]
async fn test_fetch_failure_skips_handle_without_aborting_tick() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let id = seed_battle(&repo, "b1", BattleStatus::Active, now - 100_000, now + 100_000).await;
    let user = seed_participant(&repo, &id, "u1", "u1-fm", now - 90_000).await;

    let mock = Arc::new(MockHistorySource::new().with_failures());
    let scheduler = scheduler_with(repo.clone(), mock, test_config(0, 1));

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.reconciled, 0);
    assert_eq!(summary.skipped, 1);

    // The counter is untouched, not zeroed.
    let counter = repo.get_counter(&id, &user).await.unwrap().unwrap();
    assert_eq!(counter.count, 0);
    assert!(counter.last_synced_ms.is_none());
}

#[tokio::test]
async fn test_two_shards_cover_all_participants() {
    let (repo, _temp) = setup_repo().await;
    let now = TimeMs::now().as_i64();
    let id = seed_battle(&repo, "b1", BattleStatus::Active, now - 100_000, now + 100_000).await;
    let u1 = seed_participant(&repo, &id, "u1", "alpha-fm", now - 90_000).await;
    let u2 = seed_participant(&repo, &id, "u2", "beta-fm", now - 90_000).await;

    let mock = Arc::new(
        MockHistorySource::new()
            .with_history("alpha-fm", vec![scrobble(now - 50_000)])
            .with_history("beta-fm", vec![scrobble(now - 40_000), scrobble(now - 30_000)]),
    );
    let shard_a = scheduler_with(repo.clone(), mock.clone(), test_config(0, 2));
    let shard_b = scheduler_with(repo.clone(), mock.clone(), test_config(1, 2));

    let a = shard_a.tick().await.unwrap();
    let b = shard_b.tick().await.unwrap();
    assert_eq!(a.reconciled + b.reconciled, 2);

    let c1 = repo.get_counter(&id, &u1).await.unwrap().unwrap();
    let c2 = repo.get_counter(&id, &u2).await.unwrap().unwrap();
    assert_eq!(c1.count, 1);
    assert_eq!(c2.count, 2);
}
