//! Core domain types for streaming battles.

pub mod battle;
pub mod counter;
pub mod primitives;
pub mod scrobble;
pub mod team;

pub use battle::{Battle, BattleStatus, EndTimeExtension, Participant, PlaylistTrack};
pub use counter::{Counter, ReconcileOutcome, SyncMode, MAX_TRACKED_TIMESTAMPS};
pub use primitives::{BattleId, ListenHandle, TeamId, TimeMs, UserId};
pub use scrobble::Scrobble;
pub use team::{generate_invite_code, Team, TeamMember, INVITE_CODE_MAX_ATTEMPTS};
