//! Heuristic classifier for bot-like rapid scrobbling.
//!
//! Three windowed-density rules over the sorted timestamp sequence, first
//! hit wins. These are heuristics, not proof: a positive surfaces as a flag
//! on the leaderboard, never an automatic removal.

use crate::domain::TimeMs;

/// Minimum number of events before any rule applies.
const MIN_EVENTS: usize = 5;

/// R1: any 11 consecutive events within this span.
const R1_WINDOW: usize = 11;
const R1_SPAN_MS: i64 = 60_000;

/// R2: any 5 consecutive events within this span.
const R2_WINDOW: usize = 5;
const R2_SPAN_MS: i64 = 30_000;

/// R3: mean inter-event gap over the entire span below this, given >= 10 events.
const R3_MIN_EVENTS: usize = 10;
const R3_MEAN_GAP_MS: i64 = 30_000;

/// Classify a timestamp set as suspicious. Re-evaluated fresh from the full
/// set on every reconciliation pass; never incremental.
pub fn classify(timestamps: &[TimeMs]) -> bool {
    if timestamps.len() < MIN_EVENTS {
        return false;
    }

    let mut sorted: Vec<i64> = timestamps.iter().map(|t| t.as_i64()).collect();
    sorted.sort_unstable();

    if window_within(&sorted, R1_WINDOW, R1_SPAN_MS) {
        return true;
    }
    if window_within(&sorted, R2_WINDOW, R2_SPAN_MS) {
        return true;
    }
    if sorted.len() >= R3_MIN_EVENTS {
        let total_span = sorted[sorted.len() - 1] - sorted[0];
        let gaps = (sorted.len() - 1) as i64;
        if total_span / gaps < R3_MEAN_GAP_MS {
            return true;
        }
    }
    false
}

/// Does any window of `size` consecutive sorted timestamps span <= `max_span_ms`?
fn window_within(sorted: &[i64], size: usize, max_span_ms: i64) -> bool {
    if sorted.len() < size {
        return false;
    }
    sorted
        .windows(size)
        .any(|w| w[size - 1] - w[0] <= max_span_ms)
}
