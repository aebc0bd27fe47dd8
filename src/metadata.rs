//! Now-playing metadata shared between producers and consumers.

use parking_lot::RwLock;
use serde::Serialize;

/// Title and artist of whatever is currently feeding the ring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    /// Track or stream title.
    pub title: String,
    /// Artist, empty when unknown.
    pub artist: String,
}

impl TrackInfo {
    /// Creates a `TrackInfo` from title and artist.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// The `StreamTitle` text used for ICY interleaving:
    /// `"Artist - Title"` when an artist is known, otherwise the title.
    pub fn stream_title(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// Shared now-playing state.
///
/// Written by whichever producer currently owns the ring (the playlist
/// producer sets file names, the source session sets sniffed titles) and
/// read by the ICY interleaver and the status endpoints.
pub struct NowPlaying {
    inner: RwLock<TrackInfo>,
}

impl NowPlaying {
    /// Creates now-playing state with an initial title (typically the
    /// station name).
    pub fn new(initial_title: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(TrackInfo::new(initial_title, "")),
        }
    }

    /// Replaces the current track info.
    pub fn set(&self, title: impl Into<String>, artist: impl Into<String>) {
        *self.inner.write() = TrackInfo::new(title, artist);
    }

    /// Returns a copy of the current track info.
    pub fn get(&self) -> TrackInfo {
        self.inner.read().clone()
    }

    /// Convenience for the ICY interleaver.
    pub fn stream_title(&self) -> String {
        self.inner.read().stream_title()
    }
}
