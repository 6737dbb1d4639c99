use axum::http::StatusCode;
use std::sync::Arc;
use streamclash::api::{self, AppState};
use streamclash::config::Config;
use streamclash::datasource::{HistorySource, MockHistorySource};
use streamclash::db::init_db;
use streamclash::domain::{BattleId, ListenHandle, Participant, Scrobble, TimeMs, UserId};
use streamclash::orchestration::Reconciler;
use streamclash::Repository;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    mock: Arc<MockHistorySource>,
    _temp: TempDir,
}

fn test_config() -> Config {
    Config {
        port: 0,
        database_path: ":memory:".to_string(),
        lastfm_api_url: "http://example.invalid".to_string(),
        lastfm_api_key: "test".to_string(),
        tick_interval_secs: 60,
        sync_cooldown_secs: 300,
        quick_max_pages: 2,
        inter_request_delay_ms: 0,
        request_timeout_secs: 5,
        shard_id: 0,
        total_shards: 1,
    }
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool));
    let mock = Arc::new(MockHistorySource::new());
    let config = test_config();

    let reconciler = Arc::new(Reconciler::new(
        mock.clone() as Arc<dyn HistorySource>,
        repo.clone(),
        config.clone(),
    ));
    let state = AppState::new(repo.clone(), config, reconciler);
    let app = api::create_router(state);

    TestApp {
        app,
        repo,
        mock,
        _temp: temp_dir,
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    send(app, req).await
}

async fn post(app: axum::Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

async fn send(
    app: axum::Router,
    req: axum::http::Request<axum::body::Body>,
) -> (StatusCode, serde_json::Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn battle_request(start_ms: i64, end_ms: i64) -> serde_json::Value {
    serde_json::json!({
        "host": "host-1",
        "name": "friday night clash",
        "playlist": [
            {"title": "Halo", "artist": "Beyoncé"},
            {"title": "Paranoid", "artist": "Black Sabbath"},
        ],
        "startMs": start_ms,
        "endMs": end_ms,
    })
}

#[tokio::test]
async fn test_health_endpoints() {
    let test_app = setup_test_app().await;
    let (status, body) = get(test_app.app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(test_app.app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_create_and_fetch_battle() {
    let test_app = setup_test_app().await;
    let now = TimeMs::now().as_i64();

    let (status, created) =
        post(test_app.app.clone(), "/v1/battles", battle_request(now - 1000, now + 100_000)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "active", "start in the past goes straight to active");
    assert_eq!(created["trackCount"], 2);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = get(test_app.app.clone(), &format!("/v1/battles/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "friday night clash");

    let (status, _) = get(test_app.app, "/v1/battles/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_battle_validation() {
    let test_app = setup_test_app().await;
    let now = TimeMs::now().as_i64();

    let mut empty_playlist = battle_request(now, now + 1000);
    empty_playlist["playlist"] = serde_json::json!([]);
    let (status, _) = post(test_app.app.clone(), "/v1/battles", empty_playlist).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        post(test_app.app, "/v1/battles", battle_request(now + 1000, now + 1000)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_sync_and_cooldown_flow() {
    let test_app = setup_test_app().await;
    let now = TimeMs::now().as_i64();

    let (_, created) =
        post(test_app.app.clone(), "/v1/battles", battle_request(now - 3_600_000, now + 100_000)).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Seed the roster entry directly so the checkpoint sits in the past;
    // only scrobbles after it and before the sync can count.
    let battle_id = BattleId::new(id.clone());
    let user = UserId::new("u1".to_string());
    test_app
        .repo
        .insert_participant(&Participant {
            battle_id: battle_id.clone(),
            user_id: user.clone(),
            handle: ListenHandle::new("u1-fm".to_string()),
            joined_at_ms: TimeMs::new(now - 600_000),
        })
        .await
        .unwrap();

    // Re-joining over an existing roster entry succeeds without moving
    // the checkpoint.
    let (status, joined) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/join", id),
        serde_json::json!({"userId": "u1", "handle": "u1-fm"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["userId"], "u1");
    let roster = test_app
        .repo
        .get_participant(&battle_id, &user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(roster.joined_at_ms, TimeMs::new(now - 600_000));

    test_app.mock.set_history(
        "u1-fm",
        vec![
            Scrobble::new("Halo".to_string(), "Beyoncé".to_string(), TimeMs::new(now - 300_000)),
            Scrobble::new("paranoid".to_string(), "BLACK SABBATH".to_string(), TimeMs::new(now - 240_000)),
        ],
    );

    let (status, synced) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/sync", id),
        serde_json::json!({"userId": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(synced["count"], 2);
    assert_eq!(synced["isCheater"], false);
    assert_eq!(synced["mode"], "quick");

    // Immediately again: rejected without touching the provider, with a
    // machine-readable wait.
    let calls = test_app.mock.fetch_calls();
    let (status, rejected) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/sync", id),
        serde_json::json!({"userId": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected["allowed"], false);
    assert!(rejected["retryAfterSeconds"].as_i64().unwrap() > 0);
    assert_eq!(test_app.mock.fetch_calls(), calls);

    // Syncing someone who never joined is a structural error.
    let (status, _) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/sync", id),
        serde_json::json!({"userId": "stranger"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        test_app.app,
        &format!("/v1/battles/{}/sync", id),
        serde_json::json!({"userId": "u1", "mode": "sideways"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_leave_battle() {
    let test_app = setup_test_app().await;
    let now = TimeMs::now().as_i64();

    let (_, created) =
        post(test_app.app.clone(), "/v1/battles", battle_request(now - 10_000, now + 100_000)).await;
    let id = created["id"].as_str().unwrap().to_string();

    post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/join", id),
        serde_json::json!({"userId": "u1", "handle": "u1-fm"}),
    )
    .await;

    let (status, body) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/leave", id),
        serde_json::json!({"userId": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, _) = post(
        test_app.app,
        &format!("/v1/battles/{}/leave", id),
        serde_json::json!({"userId": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_extend_battle_end_time() {
    let test_app = setup_test_app().await;
    let now = TimeMs::now().as_i64();

    let (_, created) =
        post(test_app.app.clone(), "/v1/battles", battle_request(now - 10_000, now + 100_000)).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, ext) = post(
        test_app.app.clone(),
        &format!("/v1/battles/{}/extend", id),
        serde_json::json!({"newEndMs": now + 200_000, "actor": "host-1", "reason": "overtime"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ext["newEndMs"], now + 200_000);
    assert_eq!(ext["previousEndMs"], now + 100_000);

    // Shrinking is not extending.
    let (status, _) = post(
        test_app.app,
        &format!("/v1/battles/{}/extend", id),
        serde_json::json!({"newEndMs": now + 150_000, "actor": "host-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
