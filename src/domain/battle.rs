//! Battle: a time-boxed competition bound to a playlist.

use super::{BattleId, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// Battle lifecycle status. Transitions are forward-only:
/// `Upcoming -> Active -> Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    Upcoming,
    Active,
    Ended,
}

impl BattleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattleStatus::Upcoming => "upcoming",
            BattleStatus::Active => "active",
            BattleStatus::Ended => "ended",
        }
    }
}

impl std::str::FromStr for BattleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(BattleStatus::Upcoming),
            "active" => Ok(BattleStatus::Active),
            "ended" => Ok(BattleStatus::Ended),
            other => Err(format!("unknown battle status: {}", other)),
        }
    }
}

impl std::fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One track of the matching corpus attached to a battle.
///
/// `normalized_title`/`normalized_artist` are precomputed once when the
/// playlist is attached; the matcher falls back to normalizing the raw
/// fields when they are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub title: String,
    pub artist: String,
    pub normalized_title: Option<String>,
    pub normalized_artist: Option<String>,
}

impl PlaylistTrack {
    pub fn new(title: String, artist: String) -> Self {
        Self {
            title,
            artist,
            normalized_title: None,
            normalized_artist: None,
        }
    }
}

/// One appended record of an end-time extension. Append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTimeExtension {
    pub previous_end_ms: TimeMs,
    pub new_end_ms: TimeMs,
    pub actor: UserId,
    pub reason: Option<String>,
    pub created_at_ms: TimeMs,
}

/// Roster membership: a user competing in a battle under an external
/// listening handle. Distinct from counters so that participants who have
/// never reconciled still appear on leaderboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub battle_id: BattleId,
    pub user_id: UserId,
    pub handle: super::ListenHandle,
    pub joined_at_ms: TimeMs,
}

/// A streaming battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Battle {
    pub id: BattleId,
    pub host: UserId,
    pub name: String,
    pub playlist_url: Option<String>,
    pub start_ms: TimeMs,
    pub end_ms: TimeMs,
    pub status: BattleStatus,
    pub ended_at_ms: Option<TimeMs>,
    /// Frozen snapshot JSON; set exactly once when the battle ends.
    pub final_leaderboard: Option<serde_json::Value>,
    pub created_at_ms: TimeMs,
}

impl Battle {
    /// Lower bound for countable history: a scrobble before the battle
    /// started never counts, regardless of counter checkpoints.
    pub fn history_lower_bound(&self, counter_created_at: TimeMs) -> TimeMs {
        std::cmp::max(self.start_ms, counter_created_at)
    }

    /// Upper bound for countable history at wall-clock time `now`.
    pub fn history_upper_bound(&self, now: TimeMs) -> TimeMs {
        std::cmp::min(now, self.end_ms)
    }

    pub fn has_expired(&self, now: TimeMs) -> bool {
        now >= self.end_ms
    }
}
