pub mod battles;
pub mod health;
pub mod leaderboard;
pub mod sync;
pub mod teams;

use crate::config::Config;
use crate::db::Repository;
use crate::orchestration::Reconciler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config, reconciler: Arc<Reconciler>) -> Self {
        Self {
            repo,
            config,
            reconciler,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/battles", post(battles::create_battle))
        .route("/v1/battles/:id", get(battles::get_battle))
        .route("/v1/battles/:id/extend", post(battles::extend_battle))
        .route("/v1/battles/:id/join", post(battles::join_battle))
        .route("/v1/battles/:id/leave", post(battles::leave_battle))
        .route("/v1/battles/:id/leaderboard", get(leaderboard::get_leaderboard))
        .route("/v1/battles/:id/sync", post(sync::sync_participant))
        .route("/v1/battles/:id/teams", post(teams::create_team))
        .route("/v1/teams/join", post(teams::join_team))
        .route("/v1/teams/:id/leave", post(teams::leave_team))
        .layer(cors)
        .with_state(state)
}
