//! Leaderboard aggregation over participant counters, optionally grouped by
//! team. Pure; the caller supplies the roster, counters, and teams.

use crate::domain::{Participant, Team, TeamId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One member line inside a team entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLine {
    pub user_id: UserId,
    pub count: i64,
    pub is_cheater: bool,
}

/// A ranked leaderboard entry: either a solo participant or a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LeaderboardEntry {
    #[serde(rename_all = "camelCase")]
    Solo {
        user_id: UserId,
        count: i64,
        is_cheater: bool,
    },
    #[serde(rename_all = "camelCase")]
    Team {
        team_id: TeamId,
        name: String,
        total_score: i64,
        is_cheater: bool,
        members: Vec<MemberLine>,
    },
}

impl LeaderboardEntry {
    /// Sort key: `totalScore` for teams, `count` for solos.
    pub fn score(&self) -> i64 {
        match self {
            LeaderboardEntry::Solo { count, .. } => *count,
            LeaderboardEntry::Team { total_score, .. } => *total_score,
        }
    }
}

/// Build the ranked leaderboard.
///
/// Every participant on the roster appears exactly once: either inside their
/// team's entry or as a solo entry with a zero count if they have never
/// reconciled. Entries sort descending by score; ties keep insertion order
/// (teams first, then solos in roster order).
pub fn build(
    participants: &[Participant],
    counters: &HashMap<UserId, (i64, bool, Option<TeamId>)>,
    teams: &[Team],
) -> Vec<LeaderboardEntry> {
    let mut team_members: HashMap<TeamId, Vec<MemberLine>> = HashMap::new();
    let mut solos: Vec<LeaderboardEntry> = Vec::new();

    for participant in participants {
        let (count, is_cheater, team_id) = counters
            .get(&participant.user_id)
            .cloned()
            .unwrap_or((0, false, None));

        match team_id {
            // A team_id pointing at a deleted team degrades to a solo entry.
            Some(tid) if teams.iter().any(|t| t.id == tid) => {
                team_members.entry(tid).or_default().push(MemberLine {
                    user_id: participant.user_id.clone(),
                    count,
                    is_cheater,
                });
            }
            _ => solos.push(LeaderboardEntry::Solo {
                user_id: participant.user_id.clone(),
                count,
                is_cheater,
            }),
        }
    }

    let mut entries: Vec<LeaderboardEntry> = Vec::new();
    for team in teams {
        let members = team_members.remove(&team.id).unwrap_or_default();
        if members.is_empty() {
            continue;
        }
        entries.push(LeaderboardEntry::Team {
            team_id: team.id.clone(),
            name: team.name.clone(),
            total_score: members.iter().map(|m| m.count).sum(),
            is_cheater: members.iter().any(|m| m.is_cheater),
            members,
        });
    }
    entries.extend(solos);

    // Stable sort keeps insertion order across equal scores.
    entries.sort_by_key(|e| std::cmp::Reverse(e.score()));
    entries
}
