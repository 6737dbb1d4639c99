pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use datasource::{HistoryError, HistorySource, LastfmHistorySource, MockHistorySource};
pub use db::{init_db, Repository};
pub use domain::{
    Battle, BattleId, BattleStatus, Counter, ListenHandle, Participant, PlaylistTrack, Scrobble,
    SyncMode, Team, TimeMs, UserId,
};
pub use error::AppError;
pub use orchestration::{Reconciler, Scheduler};
