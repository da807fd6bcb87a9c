//! Playback progress derived from the server's start timestamp.

use jukebox_proto::protocol::Track;
use serde::Serialize;

/// Wall-clock epoch milliseconds, comparable with `Track::started_at`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Percentage through the track, clamped to 0..=100.  Missing timing or a
/// zero duration reads as 0.
pub fn progress_pct(started_at: Option<i64>, duration_ms: Option<u64>, now_ms: i64) -> f64 {
    let (Some(started_at), Some(duration)) = (started_at, duration_ms) else {
        return 0.0;
    };
    if duration == 0 {
        return 0.0;
    }
    let elapsed = (now_ms - started_at) as f64;
    (elapsed / duration as f64 * 100.0).clamp(0.0, 100.0)
}

/// Refresh rate class of a progress consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressTier {
    /// Thin progress bars; about once a second.
    Coarse,
    /// Large visual elements; every frame.
    Frame,
}

/// Timing pair of the playing track.  Both tiers read the same pair so
/// they never disagree about where playback is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressClock {
    started_at: Option<i64>,
    duration_ms: Option<u64>,
}

impl ProgressClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_track(&mut self, track: Option<&Track>) {
        self.started_at = track.and_then(|t| t.started_at);
        self.duration_ms = track.and_then(|t| t.duration_ms);
    }

    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    pub fn pct_at(&self, now_ms: i64) -> f64 {
        progress_pct(self.started_at, self.duration_ms, now_ms)
    }
}
