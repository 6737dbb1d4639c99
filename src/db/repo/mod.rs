//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `battles.rs` - battle lifecycle, playlist tracks, end-time extensions
//! - `counters.rs` - participant roster and reconciliation counters
//! - `teams.rs` - teams, invite codes, membership

mod battles;
mod counters;
mod teams;

use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
