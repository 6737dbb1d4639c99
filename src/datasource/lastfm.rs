//! Last.fm recent-tracks client implementation.

use super::{FetchOptions, HistoryError, HistoryFetch, HistorySource};
use crate::domain::{Scrobble, TimeMs};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Page size requested from the provider. Last.fm caps `limit` at 200.
const PAGE_LIMIT: u32 = 200;

/// Last.fm history source using the public `user.getRecentTracks` method.
#[derive(Debug, Clone)]
pub struct LastfmHistorySource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl LastfmHistorySource {
    /// Create a new Last.fm history source.
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    /// Create with the default Last.fm API URL.
    pub fn default_url(api_key: String) -> Self {
        Self::new("https://ws.audioscrobbler.com/2.0".to_string(), api_key)
    }

    async fn get_page(
        &self,
        handle: &str,
        from_s: i64,
        to_s: i64,
        page: u32,
        timeout: Duration,
    ) -> Result<serde_json::Value, HistoryError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&self.base_url)
                .timeout(timeout)
                .query(&[
                    ("method", "user.getrecenttracks"),
                    ("user", handle),
                    ("from", &from_s.to_string()),
                    ("to", &to_s.to_string()),
                    ("page", &page.to_string()),
                    ("limit", &PAGE_LIMIT.to_string()),
                    ("api_key", &self.api_key),
                    ("format", "json"),
                ])
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(HistoryError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(HistoryError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(HistoryError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(HistoryError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(HistoryError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl HistorySource for LastfmHistorySource {
    async fn fetch_history(
        &self,
        handle: &str,
        from_ms: i64,
        to_ms: i64,
        options: &FetchOptions,
    ) -> Result<HistoryFetch, HistoryError> {
        // Last.fm windows are in whole seconds.
        let from_s = from_ms / 1000;
        let to_s = to_ms / 1000 + 1;

        debug!(
            handle = %handle,
            from_ms,
            to_ms,
            max_pages = ?options.max_pages,
            "Fetching listening history"
        );

        let mut scrobbles = Vec::new();
        let mut page = 1u32;

        loop {
            let response = match self
                .get_page(handle, from_s, to_s, page, options.timeout)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    // Keep what we have; the caller treats a partial result
                    // as possibly incomplete, never as "no new activity".
                    warn!(handle = %handle, page, error = %e, "Page fetch failed, returning partial history");
                    return Ok(HistoryFetch::partial(scrobbles));
                }
            };

            let recent = response.get("recenttracks").cloned().unwrap_or_default();
            let tracks = recent
                .get("track")
                .and_then(|t| t.as_array())
                .cloned()
                .unwrap_or_default();

            for track_json in &tracks {
                match parse_track(track_json) {
                    Ok(Some(scrobble)) => scrobbles.push(scrobble),
                    Ok(None) => {} // now-playing entry, no timestamp yet
                    Err(e) => warn!(handle = %handle, error = %e, "Failed to parse track"),
                }
            }

            let total_pages = recent
                .get("@attr")
                .and_then(|a| a.get("totalPages"))
                .and_then(|p| p.as_str())
                .and_then(|p| p.parse::<u32>().ok())
                .unwrap_or(page);

            if page >= total_pages {
                return Ok(HistoryFetch::complete(scrobbles));
            }
            if let Some(max) = options.max_pages {
                if page >= max {
                    debug!(handle = %handle, page, "Page cap reached, stopping pagination");
                    return Ok(HistoryFetch::partial(scrobbles));
                }
            }

            page += 1;
            tokio::time::sleep(options.inter_request_delay).await;
        }
    }
}

/// Parse one track object. Returns `Ok(None)` for now-playing entries that
/// carry no timestamp yet.
fn parse_track(track_json: &serde_json::Value) -> Result<Option<Scrobble>, HistoryError> {
    let title = track_json
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HistoryError::ParseError("Missing name field".to_string()))?
        .to_string();

    let artist = track_json
        .get("artist")
        .and_then(|a| a.get("#text"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| HistoryError::ParseError("Missing artist field".to_string()))?
        .to_string();

    let uts = match track_json.get("date").and_then(|d| d.get("uts")) {
        Some(v) => v,
        None => return Ok(None),
    };
    let uts = uts
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| uts.as_i64())
        .ok_or_else(|| HistoryError::ParseError("Invalid uts field".to_string()))?;

    Ok(Some(Scrobble::new(title, artist, TimeMs::new(uts * 1000))))
}
