//! Track matching: normalization and exact comparison of (title, artist)
//! pairs against a battle's playlist corpus. Pure, no I/O.

use crate::domain::{PlaylistTrack, Scrobble};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Normalize a title or artist for matching: lowercase, trim, NFD
/// decomposition with combining marks stripped, whitespace collapsed to
/// single spaces.
pub fn normalize(s: &str) -> String {
    let decomposed: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let mut out = String::with_capacity(decomposed.len());
    let mut pending_space = false;
    for c in decomposed.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lc in c.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

fn is_combining_mark(c: char) -> bool {
    // Unicode combining diacritical mark blocks.
    matches!(c,
        '\u{0300}'..='\u{036F}'
        | '\u{1AB0}'..='\u{1AFF}'
        | '\u{1DC0}'..='\u{1DFF}'
        | '\u{20D0}'..='\u{20FF}'
        | '\u{FE20}'..='\u{FE2F}')
}

/// Normalized (title, artist) key for a playlist track, preferring the
/// precomputed fields when present.
fn track_key(track: &PlaylistTrack) -> (String, String) {
    let title = track
        .normalized_title
        .clone()
        .unwrap_or_else(|| normalize(&track.title));
    let artist = track
        .normalized_artist
        .clone()
        .unwrap_or_else(|| normalize(&track.artist));
    (title, artist)
}

/// Precompute the normalized fields for a freshly imported playlist.
pub fn precompute_normalized(tracks: &mut [PlaylistTrack]) {
    for track in tracks {
        track.normalized_title = Some(normalize(&track.title));
        track.normalized_artist = Some(normalize(&track.artist));
    }
}

/// Does a single listening event match any track of the playlist?
pub fn matches(event: &Scrobble, playlist: &[PlaylistTrack]) -> bool {
    let key = (normalize(&event.title), normalize(&event.artist));
    playlist.iter().any(|t| track_key(t) == key)
}

/// Hash-set index over a playlist for matching many events against the same
/// corpus. Built once per reconciliation pass.
#[derive(Debug, Clone)]
pub struct TrackIndex {
    keys: HashSet<(String, String)>,
}

impl TrackIndex {
    pub fn new(playlist: &[PlaylistTrack]) -> Self {
        Self {
            keys: playlist.iter().map(track_key).collect(),
        }
    }

    pub fn contains(&self, event: &Scrobble) -> bool {
        self.keys
            .contains(&(normalize(&event.title), normalize(&event.artist)))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
