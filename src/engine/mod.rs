//! Pure computation engines: track matching, cheat classification, and
//! leaderboard aggregation. No I/O in this layer.

pub mod cheat;
pub mod leaderboard;
pub mod matcher;

pub use leaderboard::{LeaderboardEntry, MemberLine};
pub use matcher::TrackIndex;
