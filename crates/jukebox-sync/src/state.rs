//! Mirrored backend state and the read-only view handed to renderers.

use jukebox_proto::config::SurfaceKind;
use jukebox_proto::protocol::{KaraokeEntry, ThemeSnapshot, Track, ViewMode};
use jukebox_proto::store::GuestIdentity;
use serde::Serialize;

use crate::channel::ChannelStatus;
use crate::lyrics::WindowLine;
use crate::reactions::Reaction;
use crate::stability::Field;
use crate::tracker::UpNext;

/// The surface's copy of the backend's authoritative state.  Only the sync
/// core mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub karaoke_mode: bool,
    pub show_lyrics: bool,
    pub view_mode: ViewMode,
    pub youtube_id: Option<String>,
    pub lyrics_delay_ms: i64,
    pub party_name: Option<String>,
    pub karaoke_queue: Vec<KaraokeEntry>,
}

/// Optimistic edit made on this surface ahead of the backend confirming it.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEdit {
    Queue(Vec<Track>),
    ViewMode(ViewMode),
    KaraokeMode(bool),
    ShowLyrics(bool),
    YoutubeId(Option<String>),
    LyricsDelay(i64),
    PartyName(String),
    KaraokeQueue(Vec<KaraokeEntry>),
}

impl LocalEdit {
    pub fn field(&self) -> Field {
        match self {
            LocalEdit::Queue(_) => Field::Queue,
            LocalEdit::ViewMode(_) => Field::ViewMode,
            LocalEdit::KaraokeMode(_) => Field::KaraokeMode,
            LocalEdit::ShowLyrics(_) => Field::ShowLyrics,
            LocalEdit::YoutubeId(_) => Field::YoutubeId,
            LocalEdit::LyricsDelay(_) => Field::LyricsDelay,
            LocalEdit::PartyName(_) => Field::PartyName,
            LocalEdit::KaraokeQueue(_) => Field::KaraokeQueue,
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl SyncState {
    /// Merge the fields present in `theme`.  `admit` decides per field
    /// whether the value may be written; returns the fields that changed.
    pub fn apply_theme(
        &mut self,
        theme: &ThemeSnapshot,
        mut admit: impl FnMut(Field) -> bool,
    ) -> Vec<Field> {
        let mut changed = Vec::new();

        if let Some(mode) = theme.view_mode() {
            if admit(Field::ViewMode) && replace(&mut self.view_mode, mode) {
                changed.push(Field::ViewMode);
            }
        }
        if let Some(on) = theme.is_karaoke_mode {
            if admit(Field::KaraokeMode) && replace(&mut self.karaoke_mode, on) {
                changed.push(Field::KaraokeMode);
            }
        }
        if let Some(id) = theme.youtube_id.as_ref() {
            let id = id.clone().filter(|s| !s.is_empty());
            if admit(Field::YoutubeId) && replace(&mut self.youtube_id, id) {
                changed.push(Field::YoutubeId);
            }
        }
        if let Some(show) = theme.show_lyrics {
            if admit(Field::ShowLyrics) && replace(&mut self.show_lyrics, show) {
                changed.push(Field::ShowLyrics);
            }
        }
        if let Some(delay) = theme.lyrics_delay_ms {
            if admit(Field::LyricsDelay) && replace(&mut self.lyrics_delay_ms, delay) {
                changed.push(Field::LyricsDelay);
            }
        }
        if let Some(queue) = theme.karaoke_queue.as_ref() {
            if admit(Field::KaraokeQueue) && replace(&mut self.karaoke_queue, queue.clone()) {
                changed.push(Field::KaraokeQueue);
            }
        }
        changed
    }

    pub fn set_queue(&mut self, queue: Vec<Track>) -> bool {
        replace(&mut self.queue, queue)
    }

    pub fn set_party_name(&mut self, name: Option<String>) -> bool {
        replace(&mut self.party_name, name)
    }

    pub fn set_karaoke_queue(&mut self, queue: Vec<KaraokeEntry>) -> bool {
        replace(&mut self.karaoke_queue, queue)
    }

    /// Apply a local edit.  Returns true when the value changed.
    pub fn apply_edit(&mut self, edit: LocalEdit) -> bool {
        match edit {
            LocalEdit::Queue(q) => replace(&mut self.queue, q),
            LocalEdit::ViewMode(m) => replace(&mut self.view_mode, m),
            LocalEdit::KaraokeMode(on) => replace(&mut self.karaoke_mode, on),
            LocalEdit::ShowLyrics(on) => replace(&mut self.show_lyrics, on),
            LocalEdit::YoutubeId(id) => replace(&mut self.youtube_id, id),
            LocalEdit::LyricsDelay(d) => replace(&mut self.lyrics_delay_ms, d),
            LocalEdit::PartyName(n) => replace(&mut self.party_name, Some(n)),
            LocalEdit::KaraokeQueue(q) => replace(&mut self.karaoke_queue, q),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LyricsView {
    /// `idle`, `loading`, `synced`, `plain` or `unavailable`.
    pub status: &'static str,
    pub active: Option<usize>,
    pub window: Vec<WindowLineView>,
    /// Full text in the `plain` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowLineView {
    pub time: f64,
    pub text: String,
    pub active: bool,
    pub past: bool,
}

impl From<WindowLine> for WindowLineView {
    fn from(line: WindowLine) -> Self {
        use crate::lyrics::Emphasis;
        Self {
            time: line.time,
            text: line.text,
            active: line.emphasis == Emphasis::Active,
            past: line.emphasis == Emphasis::Past,
        }
    }
}

/// Everything a renderer needs, refreshed by the core after each event.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceView {
    pub kind: SurfaceKind,
    pub surface_id: String,
    pub connection: ChannelStatus,
    pub state: SyncState,
    /// Recently played, oldest first, without the playing track.
    pub history: Vec<Track>,
    /// Queue without the playing track.
    pub queue: Vec<Track>,
    pub up_next: Option<UpNext>,
    pub lyrics: LyricsView,
    pub progress_pct: f64,
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<GuestView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestView {
    pub id: String,
    pub name: String,
    pub has_custom_name: bool,
}

impl From<GuestIdentity> for GuestView {
    fn from(g: GuestIdentity) -> Self {
        Self {
            id: g.id,
            name: g.name,
            has_custom_name: g.has_custom_name,
        }
    }
}

impl SurfaceView {
    pub fn new(kind: SurfaceKind, surface_id: impl Into<String>) -> Self {
        Self {
            kind,
            surface_id: surface_id.into(),
            connection: ChannelStatus::Disconnected,
            state: SyncState::default(),
            history: Vec::new(),
            queue: Vec::new(),
            up_next: None,
            lyrics: LyricsView {
                status: "idle",
                ..Default::default()
            },
            progress_pct: 0.0,
            reactions: Vec::new(),
            guest: None,
        }
    }
}
