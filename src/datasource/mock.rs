//! Mock history source for testing without network calls.

use super::{FetchOptions, HistoryError, HistoryFetch, HistorySource};
use crate::domain::{Scrobble, TimeMs};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock history source returning predefined scrobbles per handle.
#[derive(Debug, Default)]
pub struct MockHistorySource {
    scrobbles: Mutex<HashMap<String, Vec<Scrobble>>>,
    /// When set, every fetch reports this completeness instead of `true`.
    force_incomplete: bool,
    /// When set, every fetch fails outright.
    fail_all: bool,
    fetch_calls: AtomicUsize,
}

impl MockHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add scrobbles for a handle.
    pub fn with_history(self, handle: &str, scrobbles: Vec<Scrobble>) -> Self {
        self.scrobbles
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default()
            .extend(scrobbles);
        self
    }

    /// Make every fetch report an incomplete (partial) result.
    pub fn with_incomplete_fetches(mut self) -> Self {
        self.force_incomplete = true;
        self
    }

    /// Make every fetch return an error.
    pub fn with_failures(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Replace the history for a handle after construction.
    pub fn set_history(&self, handle: &str, scrobbles: Vec<Scrobble>) {
        self.scrobbles
            .lock()
            .unwrap()
            .insert(handle.to_string(), scrobbles);
    }

    /// Number of `fetch_history` calls made so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for MockHistorySource {
    async fn fetch_history(
        &self,
        handle: &str,
        from_ms: i64,
        to_ms: i64,
        _options: &FetchOptions,
    ) -> Result<HistoryFetch, HistoryError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all {
            return Err(HistoryError::NetworkError("mock failure".to_string()));
        }

        let from = TimeMs::new(from_ms);
        let to = TimeMs::new(to_ms);
        let scrobbles: Vec<Scrobble> = self
            .scrobbles
            .lock()
            .unwrap()
            .get(handle)
            .map(|all| {
                all.iter()
                    .filter(|s| s.time_ms >= from && s.time_ms <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if self.force_incomplete {
            Ok(HistoryFetch::partial(scrobbles))
        } else {
            Ok(HistoryFetch::complete(scrobbles))
        }
    }
}
