//! Orchestration: the reconciliation driver, lifecycle scheduler, and the
//! caches they own.

pub mod cache;
pub mod reconciler;
pub mod scheduler;

pub use cache::TtlCache;
pub use reconciler::{ReconcileError, ReconcileOptions, Reconciler, SyncPermit};
pub use scheduler::{build_live_leaderboard, shard_handles, Scheduler, TickSummary};
