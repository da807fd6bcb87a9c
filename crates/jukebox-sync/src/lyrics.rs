//! Time-coded lyrics: LRC parsing, active-line lookup and the per-surface
//! lyrics state machine.
//!
//! Every surface kind uses this module; the host preview, guest view and
//! projector only differ in how many window lines they draw.

use jukebox_proto::protocol::LyricsPayload;
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    /// Seconds from track start.
    pub time: f64,
    pub text: String,
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[(\d{2}):(\d{2})\.(\d{2,3})\]").expect("valid LRC tag regex"))
}

/// Parse LRC text into lines sorted by time.
///
/// Each `[MM:SS.xx]` or `[MM:SS.xxx]` tag on a line yields one entry with
/// the line's text.  Lines without a tag, or with nothing left after the
/// tags are stripped, are dropped.
pub fn parse_lrc(text: &str) -> Vec<LyricLine> {
    let re = tag_regex();
    let mut lines = Vec::new();

    for raw in text.lines() {
        let times: Vec<f64> = re
            .captures_iter(raw)
            .filter_map(|caps| {
                let min: f64 = caps[1].parse().ok()?;
                let sec: f64 = caps[2].parse().ok()?;
                let frac = &caps[3];
                let mut ms: f64 = frac.parse().ok()?;
                if frac.len() == 2 {
                    ms *= 10.0;
                }
                Some(min * 60.0 + sec + ms / 1000.0)
            })
            .collect();
        if times.is_empty() {
            continue;
        }

        let body = re.replace_all(raw, "");
        let body = body.trim();
        if body.is_empty() {
            continue;
        }

        for time in times {
            lines.push(LyricLine {
                time,
                text: body.to_string(),
            });
        }
    }

    lines.sort_by(|a, b| a.time.total_cmp(&b.time));
    lines
}

/// Index of the last line whose time has been reached, `None` before the
/// first line.  `lines` must be sorted, which `parse_lrc` guarantees.
pub fn active_index(lines: &[LyricLine], elapsed_secs: f64) -> Option<usize> {
    let reached = lines.partition_point(|l| l.time <= elapsed_secs);
    reached.checked_sub(1)
}

/// Lines to draw around the active one: one before, two after.
pub fn window(len: usize, active: Option<usize>) -> Range<usize> {
    let anchor = active.unwrap_or(0);
    let end = len.min(anchor + 3);
    anchor.saturating_sub(1).min(end)..end
}

/// Playback position in seconds for lyric lookup, shifted by the host's
/// delay setting.  `None` without a start timestamp.
pub fn elapsed_secs(started_at: Option<i64>, delay_ms: i64, now_ms: i64) -> Option<f64> {
    let started_at = started_at?;
    Some((now_ms - started_at - delay_ms) as f64 / 1000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Past,
    Active,
    Upcoming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowLine {
    pub time: f64,
    pub text: String,
    pub emphasis: Emphasis,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LyricsState {
    /// Nothing playing.
    #[default]
    Idle,
    Loading,
    Synced(Vec<LyricLine>),
    Plain(String),
    Unavailable,
}

impl LyricsState {
    pub fn label(&self) -> &'static str {
        match self {
            LyricsState::Idle => "idle",
            LyricsState::Loading => "loading",
            LyricsState::Synced(_) => "synced",
            LyricsState::Plain(_) => "plain",
            LyricsState::Unavailable => "unavailable",
        }
    }
}

/// Lyrics for the playing track.  Loads are keyed by track identity so a
/// late response for an earlier track is rejected.
#[derive(Debug, Default)]
pub struct LyricsEngine {
    state: LyricsState,
    track: Option<String>,
    active: Option<usize>,
}

impl LyricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LyricsState {
        &self.state
    }

    pub fn track(&self) -> Option<&str> {
        self.track.as_deref()
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Forget the previous track's lyrics.  `Loading` while a track is
    /// playing, `Idle` otherwise.
    pub fn reset(&mut self, track: Option<&str>) {
        self.track = track.map(str::to_string);
        self.active = None;
        self.state = if self.track.is_some() {
            LyricsState::Loading
        } else {
            LyricsState::Idle
        };
    }

    /// Install a payload for `track`.  Returns false (and changes nothing)
    /// when `track` is no longer the current one, or when an empty payload
    /// would replace lyrics already shown.
    pub fn load(&mut self, track: &str, payload: &LyricsPayload) -> bool {
        if self.track.as_deref() != Some(track) {
            return false;
        }
        if payload.is_empty() && self.has_text() {
            return false;
        }
        self.active = None;

        let synced = payload.synced_text().map(parse_lrc).unwrap_or_default();
        self.state = if !synced.is_empty() {
            LyricsState::Synced(synced)
        } else if let Some(plain) = payload.plain_text() {
            LyricsState::Plain(plain.to_string())
        } else {
            LyricsState::Unavailable
        };
        true
    }

    /// The lookup for `track` failed.  Only a pending lookup is affected.
    pub fn fail(&mut self, track: &str) -> bool {
        if self.track.as_deref() != Some(track) || self.state != LyricsState::Loading {
            return false;
        }
        self.active = None;
        self.state = LyricsState::Unavailable;
        true
    }

    /// Still waiting, or nothing was found.
    pub fn needs_lyrics(&self) -> bool {
        matches!(self.state, LyricsState::Loading | LyricsState::Unavailable)
    }

    fn has_text(&self) -> bool {
        matches!(self.state, LyricsState::Synced(_) | LyricsState::Plain(_))
    }

    /// Recompute the active line.  Returns true when it moved.
    pub fn tick(&mut self, elapsed_secs: Option<f64>) -> bool {
        let next = match (&self.state, elapsed_secs) {
            (LyricsState::Synced(lines), Some(elapsed)) => active_index(lines, elapsed),
            _ => None,
        };
        if next == self.active {
            return false;
        }
        self.active = next;
        true
    }

    pub fn window(&self) -> Vec<WindowLine> {
        let LyricsState::Synced(lines) = &self.state else {
            return Vec::new();
        };
        let active_time = self.active.map(|i| lines[i].time);
        lines[window(lines.len(), self.active)]
            .iter()
            .map(|line| WindowLine {
                time: line.time,
                text: line.text.clone(),
                emphasis: match active_time {
                    Some(t) if line.time < t => Emphasis::Past,
                    Some(t) if line.time == t => Emphasis::Active,
                    _ => Emphasis::Upcoming,
                },
            })
            .collect()
    }
}
