//! Per-field guard against the poller reverting fresher values.
//!
//! A surface that edits a field locally (host toggling a mode, reordering
//! the queue) keeps its value while the backend catches up: poll results
//! for that field are ignored until the stability window has passed.  Push
//! events are never gated.
//!
//! The gate also remembers when the push channel last wrote each field so
//! a poll issued before that write cannot overwrite it on arrival.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Every field of the mirrored state the poller can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CurrentTrack,
    Queue,
    ViewMode,
    KaraokeMode,
    ShowLyrics,
    YoutubeId,
    LyricsDelay,
    PartyName,
    KaraokeQueue,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::CurrentTrack => "current_track",
            Field::Queue => "queue",
            Field::ViewMode => "view_mode",
            Field::KaraokeMode => "karaoke_mode",
            Field::ShowLyrics => "show_lyrics",
            Field::YoutubeId => "youtube_id",
            Field::LyricsDelay => "lyrics_delay_ms",
            Field::PartyName => "party_name",
            Field::KaraokeQueue => "karaoke_queue",
        }
    }
}

#[derive(Debug)]
pub struct StabilityGate {
    window: Duration,
    local: HashMap<Field, Instant>,
    remote: HashMap<Field, Instant>,
}

impl StabilityGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    pub fn record_local_at(&mut self, field: Field, at: Instant) {
        self.local.insert(field, at);
    }

    /// Note a push-channel write.
    pub fn record_remote_at(&mut self, field: Field, at: Instant) {
        self.remote.insert(field, at);
    }

    /// True once the last local write to `field` is older than the window.
    pub fn is_stable_at(&self, field: Field, now: Instant) -> bool {
        match self.local.get(&field) {
            Some(at) => now.saturating_duration_since(*at) > self.window,
            None => true,
        }
    }

    /// Whether a poll result for `field`, requested at `issued_at`, may be
    /// applied at `now`.
    pub fn admits_poll_at(&self, field: Field, issued_at: Instant, now: Instant) -> bool {
        if !self.is_stable_at(field, now) {
            return false;
        }
        match self.remote.get(&field) {
            Some(pushed) => *pushed <= issued_at,
            None => true,
        }
    }
}
