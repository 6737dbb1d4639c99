//! Per (battle, participant) verified listening counter.

use super::{BattleId, TeamId, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// How many matched timestamps a counter retains for re-verification.
/// The cheat classifier runs over the full in-pass set before truncation.
pub const MAX_TRACKED_TIMESTAMPS: usize = 500;

/// Reconciliation mode. Quick mode caps pagination against the external
/// provider and may therefore undercount high-volume listeners relative to
/// full mode; that gap is an accepted tradeoff, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Quick,
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Quick => "quick",
            SyncMode::Full => "full",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(SyncMode::Quick),
            "full" => Ok(SyncMode::Full),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}

/// Incremental verification state for one participant in one battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub battle_id: BattleId,
    pub user_id: UserId,
    /// Verified matched-scrobble count. Recomputed in full on each pass.
    pub count: i64,
    /// Re-evaluated from the full timestamp set each pass, not OR-accumulated.
    pub is_cheater: bool,
    /// Matched scrobble timestamps, most recent `MAX_TRACKED_TIMESTAMPS`.
    pub timestamps: Vec<TimeMs>,
    pub team_id: Option<TeamId>,
    /// Checkpoint: lower bound for countable history on every pass.
    pub created_at_ms: TimeMs,
    pub last_synced_ms: Option<TimeMs>,
    pub last_sync_mode: Option<SyncMode>,
}

/// Outcome of one reconciliation pass, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub count: i64,
    pub is_cheater: bool,
    pub timestamps: Vec<TimeMs>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!(SyncMode::from_str("quick").unwrap(), SyncMode::Quick);
        assert_eq!(SyncMode::from_str(" Full ").unwrap(), SyncMode::Full);
        assert!(SyncMode::from_str("turbo").is_err());
    }
}
