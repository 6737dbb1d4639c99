//! History source abstraction for fetching listening events from an
//! external scrobble provider.

use crate::domain::Scrobble;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod lastfm;
pub mod mock;

pub use lastfm::LastfmHistorySource;
pub use mock::MockHistorySource;

/// Options controlling one history fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Stop after this many pages ("quick" mode); `None` paginates until the
    /// provider signals no more pages ("full" mode).
    pub max_pages: Option<u32>,
    /// Pause between page requests, honoring the provider's rate limits.
    pub inter_request_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_pages: None,
            inter_request_delay: Duration::from_millis(250),
        }
    }
}

/// Result of one history fetch.
///
/// `complete` is false when pagination stopped early, either because a page
/// request failed or because `max_pages` was hit. Callers must treat an
/// incomplete result as possibly missing events, never as proof of "no new
/// activity".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFetch {
    pub scrobbles: Vec<Scrobble>,
    pub complete: bool,
}

impl HistoryFetch {
    pub fn complete(scrobbles: Vec<Scrobble>) -> Self {
        Self {
            scrobbles,
            complete: true,
        }
    }

    pub fn partial(scrobbles: Vec<Scrobble>) -> Self {
        Self {
            scrobbles,
            complete: false,
        }
    }
}

/// History source trait.
///
/// Implementations handle pagination, inter-request delay, and transient
/// retries. A failure mid-pagination must surface as an `Ok` partial fetch,
/// not an error; `Err` is reserved for requests that could not start at all.
#[async_trait]
pub trait HistorySource: Send + Sync + fmt::Debug {
    /// Fetch listening events for a handle within `[from_ms, to_ms]`.
    ///
    /// The provider's own window filtering is treated as data, not a
    /// guarantee; callers re-filter defensively.
    async fn fetch_history(
        &self,
        handle: &str,
        from_ms: i64,
        to_ms: i64,
        options: &FetchOptions,
    ) -> Result<HistoryFetch, HistoryError>;
}

/// Error type for history source operations.
#[derive(Debug, Clone)]
pub enum HistoryError {
    /// Network error (connection timeout, DNS failure).
    NetworkError(String),
    /// HTTP error (429 rate limit, 5xx server error).
    HttpError { status: u16, message: String },
    /// Invalid JSON or malformed response.
    ParseError(String),
    /// Provider-side rate limit exceeded.
    RateLimited,
    /// Other error.
    Other(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            HistoryError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            HistoryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            HistoryError::RateLimited => write!(f, "Rate limited"),
            HistoryError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for HistoryError {}
