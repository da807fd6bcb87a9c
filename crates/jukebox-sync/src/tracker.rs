//! Now-playing transition detection and the recently-played log.

use jukebox_proto::protocol::{KaraokeEntry, Track};
use jukebox_proto::store::HISTORY_LIMIT;
use serde::Serialize;

/// Outcome of observing an authoritative track value.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Null track; nothing changes.
    Ignored,
    /// Same identity as before.  Mutable fields (start time) were taken.
    Refreshed,
    /// A different track started.  `archived` is what went into history.
    Changed { archived: Option<Track> },
}

/// Owns the single "previous track" cell and the bounded history log.
#[derive(Debug, Default)]
pub struct TrackTracker {
    previous: Option<Track>,
    history: Vec<Track>,
}

impl TrackTracker {
    /// Start from a persisted history (oldest first).
    pub fn new(mut history: Vec<Track>) -> Self {
        if history.len() > HISTORY_LIMIT {
            history.drain(..history.len() - HISTORY_LIMIT);
        }
        Self {
            previous: None,
            history,
        }
    }

    pub fn previous(&self) -> Option<&Track> {
        self.previous.as_ref()
    }

    /// Oldest first.
    pub fn history(&self) -> &[Track] {
        &self.history
    }

    pub fn observe(&mut self, track: Option<&Track>) -> Transition {
        let Some(track) = track else {
            return Transition::Ignored;
        };

        if let Some(prev) = self.previous.as_ref() {
            if prev.same_identity(track) {
                self.previous = Some(track.clone());
                return Transition::Refreshed;
            }
        }

        // The log never holds the identity that is now playing.
        self.history.retain(|t| !t.same_identity(track));

        let archived = self.previous.take();
        if let Some(prev) = archived.as_ref() {
            self.history.push(prev.clone());
            if self.history.len() > HISTORY_LIMIT {
                self.history.drain(..self.history.len() - HISTORY_LIMIT);
            }
        }
        self.previous = Some(track.clone());
        Transition::Changed { archived }
    }
}

/// Copy of `tracks` without any entry matching the playing identity.
pub fn without_current(tracks: &[Track], current: Option<&Track>) -> Vec<Track> {
    tracks
        .iter()
        .filter(|t| current.map_or(true, |c| !c.same_identity(t)))
        .cloned()
        .collect()
}

/// What plays next, as shown on the projector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpNext {
    Track { name: String, artist: String },
    Karaoke { singer: String, title: String },
}

/// First karaoke entry in karaoke mode, otherwise the first queued track
/// that is not the one playing.
pub fn next_up(
    karaoke_mode: bool,
    karaoke_queue: &[KaraokeEntry],
    queue: &[Track],
    current: Option<&Track>,
) -> Option<UpNext> {
    if karaoke_mode {
        return karaoke_queue.first().map(|e| UpNext::Karaoke {
            singer: e.singer.clone().unwrap_or_default(),
            title: e.title.clone().unwrap_or_default(),
        });
    }
    queue
        .iter()
        .find(|t| current.map_or(true, |c| !c.same_identity(t)))
        .map(|t| UpNext::Track {
            name: t.name.clone(),
            artist: t.artist.clone(),
        })
}
