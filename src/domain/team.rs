//! Teams: named groups of participants within a battle.

use super::{BattleId, TeamId, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// Length of a team invite code.
pub const INVITE_CODE_LEN: usize = 8;

/// How many times invite-code generation retries on a uniqueness collision
/// before giving up.
pub const INVITE_CODE_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub battle_id: BattleId,
    /// Unique within its battle.
    pub name: String,
    /// 8-char code, unique across all teams.
    pub invite_code: String,
    pub created_at_ms: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub joined_at_ms: TimeMs,
}

/// Generate a candidate invite code. Uniqueness is enforced by the database;
/// callers retry on collision up to `INVITE_CODE_MAX_ATTEMPTS`.
pub fn generate_invite_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..INVITE_CODE_LEN].to_ascii_uppercase()
}
