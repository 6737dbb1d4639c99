//! Listening events as reported by the external history provider.

use super::TimeMs;
use serde::{Deserialize, Serialize};

/// A single timestamped listening event (a "scrobble").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scrobble {
    pub title: String,
    pub artist: String,
    pub time_ms: TimeMs,
}

impl Scrobble {
    pub fn new(title: String, artist: String, time_ms: TimeMs) -> Self {
        Self {
            title,
            artist,
            time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrobble_clone_and_eq() {
        let s = Scrobble::new("Paranoid".to_string(), "Black Sabbath".to_string(), TimeMs::new(1000));
        assert_eq!(s, s.clone());
    }
}
