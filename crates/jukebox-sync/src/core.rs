/// SyncCore: single-owner event loop for a surface's mirrored state.
///
/// The push channel, the poller and the tick tasks only send `SyncEvent`s;
/// every state mutation happens here.  Handlers return `Effect`s for work
/// that leaves the process (lyrics lookup, reaction notify, join announce)
/// or needs a timer (reaction expiry); the run loop hands those to the
/// `EffectRunner`, whose tasks report back as events.
///
/// After each event the core rewrites the `SurfaceView` snapshot if
/// anything visible changed and broadcasts a `SurfaceUpdate` per change.
use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::config::{Config, SurfaceKind};
use jukebox_proto::protocol::{ChannelEvent, LyricsPayload, Track};
use jukebox_proto::store::{GuestIdentity, LocalStore};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::BackendClient;
use crate::channel::ChannelStatus;
use crate::clock::{self, ProgressClock, ProgressTier};
use crate::lyrics::{self, LyricsEngine, LyricsState};
use crate::poller::PollSnapshot;
use crate::reactions::{self, Reaction, ReactionBroadcast, JOIN_EMOJI};
use crate::stability::{Field, StabilityGate};
use crate::state::{LocalEdit, LyricsView, SurfaceView, SyncState};
use crate::tracker::{self, TrackTracker, Transition};

// ── SyncEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the SyncCore loop.
#[derive(Debug)]
pub enum SyncEvent {
    /// Decoded push-channel message.
    Push(ChannelEvent),
    /// Push-channel connectivity changed.
    Channel(ChannelStatus),
    /// Result of one reconciliation cycle.
    Poll(Box<PollSnapshot>),
    /// Optimistic edit made on this surface.
    Edit(LocalEdit),
    /// Lyrics lookup finished.  `None` on failure.
    LyricsFetched {
        track: String,
        payload: Option<LyricsPayload>,
    },
    TriggerReaction(String),
    ReactionExpired(u64),
    /// Guest picked a display name.
    Join(String),
    LyricsTick,
    ProgressTick(ProgressTier),
    Shutdown,
}

/// Work the core wants done outside its loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchLyrics {
        track: String,
        name: String,
        artist: String,
    },
    NotifyReaction {
        emoji: String,
    },
    ExpireReaction {
        id: u64,
        after: Duration,
    },
    AnnounceJoin {
        guest_id: String,
        name: String,
    },
}

/// Change notifications for renderers.  The full picture is always in the
/// `SurfaceView`; these say what moved.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceUpdate {
    State {
        fields: Vec<&'static str>,
    },
    NowPlaying {
        track: Option<Track>,
        archived: Option<Track>,
    },
    Lyrics {
        status: &'static str,
    },
    LyricLine {
        active: Option<usize>,
    },
    Progress {
        tier: ProgressTier,
        pct: f64,
    },
    ReactionAdded {
        reaction: Reaction,
    },
    ReactionExpired {
        id: u64,
    },
    Connection {
        status: ChannelStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Dirty {
    Clean,
    Progress,
    All,
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    kind: SurfaceKind,
    surface_id: String,
    state: SyncState,
    gate: StabilityGate,
    tracker: TrackTracker,
    lyrics: LyricsEngine,
    clock: ProgressClock,
    reactions: ReactionBroadcast,
    store: LocalStore,
    connection: ChannelStatus,
    /// Last join notice shown, so a repeated poll does not re-announce it.
    last_joiner: Option<String>,
    guest: Option<GuestIdentity>,
    progress_pct: f64,
    dirty: Dirty,
    view: Arc<RwLock<SurfaceView>>,
    updates: broadcast::Sender<SurfaceUpdate>,
}

impl SyncCore {
    pub fn new(
        kind: SurfaceKind,
        surface_id: impl Into<String>,
        config: &Config,
        mut store: LocalStore,
        updates: broadcast::Sender<SurfaceUpdate>,
    ) -> Self {
        let surface_id = surface_id.into();
        let history = store.history();
        let guest = (kind == SurfaceKind::Guest).then(|| store.guest_identity());
        info!(
            "SyncCore: {} surface '{}' starting with {} history entries",
            kind.label(),
            surface_id,
            history.len()
        );

        let mut core = Self {
            kind,
            state: SyncState::default(),
            gate: StabilityGate::new(config.stability_window(kind)),
            tracker: TrackTracker::new(history),
            lyrics: LyricsEngine::new(),
            clock: ProgressClock::new(),
            reactions: ReactionBroadcast::new(Duration::from_millis(config.timing.reaction_ttl_ms)),
            store,
            connection: ChannelStatus::Disconnected,
            last_joiner: None,
            guest,
            progress_pct: 0.0,
            dirty: Dirty::Clean,
            view: Arc::new(RwLock::new(SurfaceView::new(kind, surface_id.clone()))),
            updates,
            surface_id,
        };
        let initial = core.snapshot();
        core.view = Arc::new(RwLock::new(initial));
        core
    }

    /// Shared handle to the render snapshot.  Only the core writes it.
    pub fn view(&self) -> Arc<RwLock<SurfaceView>> {
        Arc::clone(&self.view)
    }

    /// Run the core event loop until `Shutdown`, until the runner's token is
    /// cancelled, or until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<SyncEvent>, effects: EffectRunner) {
        info!("SyncCore: starting event loop");
        let cancel = effects.cancel.clone();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("SyncCore: cancelled");
                    break;
                }
                evt = events.recv() => evt,
            };
            let evt = match next {
                None => {
                    info!("SyncCore: event channel closed, shutting down");
                    break;
                }
                Some(SyncEvent::Shutdown) => {
                    info!("SyncCore: shutdown requested");
                    break;
                }
                Some(evt) => evt,
            };

            for effect in self.handle(evt, Instant::now(), clock::now_ms()) {
                effects.execute(effect);
            }
            self.publish().await;
        }

        if let Err(e) = self.store.save_history(self.tracker.history()) {
            warn!("SyncCore: failed to persist history on shutdown: {}", e);
        }
    }

    async fn publish(&mut self) {
        match self.dirty {
            Dirty::Clean => return,
            Dirty::Progress => self.view.write().await.progress_pct = self.progress_pct,
            Dirty::All => {
                let snapshot = self.snapshot();
                *self.view.write().await = snapshot;
            }
        }
        self.dirty = Dirty::Clean;
    }

    fn mark(&mut self, level: Dirty) {
        self.dirty = self.dirty.max(level);
    }

    fn emit(&self, update: SurfaceUpdate) {
        let _ = self.updates.send(update);
    }

    /// Apply one event.  `now` drives the stability gate and reaction
    /// timestamps; `wall_ms` is compared with server start times.
    pub fn handle(&mut self, event: SyncEvent, now: Instant, wall_ms: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            SyncEvent::Push(evt) => self.handle_push(evt, now, &mut effects),

            SyncEvent::Channel(status) => {
                if status != self.connection {
                    info!("SyncCore: channel {:?}", status);
                    self.connection = status;
                    self.emit(SurfaceUpdate::Connection { status });
                    self.mark(Dirty::All);
                }
            }

            SyncEvent::Poll(snapshot) => self.handle_poll(*snapshot, now, &mut effects),

            SyncEvent::Edit(edit) => {
                let field = edit.field();
                self.gate.record_local_at(field, now);
                if self.state.apply_edit(edit) {
                    debug!("SyncCore: local edit to {}", field.label());
                    self.state_changed(vec![field]);
                }
            }

            SyncEvent::LyricsFetched { track, payload } => {
                let applied = match payload {
                    Some(p) => self.lyrics.load(&track, &p),
                    None => self.lyrics.fail(&track),
                };
                if applied {
                    self.lyrics_changed();
                    self.tick_lyrics(wall_ms);
                } else {
                    debug!("SyncCore: discarding lyrics result for {}", track);
                }
            }

            SyncEvent::TriggerReaction(emoji) => {
                self.add_reaction(&emoji, None, &mut effects);
                effects.push(Effect::NotifyReaction { emoji });
            }

            SyncEvent::ReactionExpired(id) => {
                if self.reactions.expire(id) {
                    self.emit(SurfaceUpdate::ReactionExpired { id });
                    self.mark(Dirty::All);
                }
            }

            SyncEvent::Join(name) => {
                let identity = match self.store.set_guest_name(&name) {
                    Ok(identity) => identity,
                    Err(e) => {
                        warn!("SyncCore: failed to persist guest name: {}", e);
                        let mut identity = self.store.guest_identity();
                        identity.name = name.trim().to_string();
                        identity
                    }
                };
                info!("SyncCore: joining as '{}' ({})", identity.name, identity.id);
                effects.push(Effect::AnnounceJoin {
                    guest_id: identity.id.clone(),
                    name: identity.name.clone(),
                });
                self.guest = Some(identity);
                self.mark(Dirty::All);
            }

            SyncEvent::LyricsTick => self.tick_lyrics(wall_ms),

            SyncEvent::ProgressTick(tier) => {
                let pct = self.clock.pct_at(wall_ms);
                self.progress_pct = pct;
                self.emit(SurfaceUpdate::Progress { tier, pct });
                self.mark(Dirty::Progress);
            }

            SyncEvent::Shutdown => {}
        }
        effects
    }

    // ── push channel ──────────────────────────────────────────────────────────

    fn handle_push(&mut self, evt: ChannelEvent, now: Instant, effects: &mut Vec<Effect>) {
        match evt {
            ChannelEvent::Init(init) => {
                info!("SyncCore: INIT resync");
                let init = *init;
                let gate = &mut self.gate;
                let mut changed = self.state.apply_theme(&init.theme, |f| {
                    gate.record_remote_at(f, now);
                    true
                });
                if let Some(name) = init.name {
                    self.gate.record_remote_at(Field::PartyName, now);
                    if self.state.set_party_name(Some(name)) {
                        changed.push(Field::PartyName);
                    }
                }
                match init.current_track {
                    Some(track) => {
                        self.gate.record_remote_at(Field::CurrentTrack, now);
                        self.apply_current(track, init.current_lyrics, effects);
                    }
                    // Lyrics of whatever is playing; the track itself comes
                    // from CURRENT_TRACK or the next poll.
                    None => {
                        if let Some(payload) = init.current_lyrics.filter(|p| !p.is_empty()) {
                            self.load_lyrics(None, &payload);
                        }
                    }
                }
                self.state_changed(changed);
            }

            ChannelEvent::QueueUpdate(queue) => {
                self.gate.record_remote_at(Field::Queue, now);
                if self.state.set_queue(queue) {
                    self.state_changed(vec![Field::Queue]);
                }
            }

            ChannelEvent::NameUpdate(name) => {
                self.gate.record_remote_at(Field::PartyName, now);
                if self.state.set_party_name(Some(name)) {
                    self.state_changed(vec![Field::PartyName]);
                }
            }

            ChannelEvent::CurrentTrack(track) => {
                self.gate.record_remote_at(Field::CurrentTrack, now);
                self.apply_current(track, None, effects);
            }

            ChannelEvent::ThemeUpdate(theme) => {
                let gate = &mut self.gate;
                let changed = self.state.apply_theme(&theme, |f| {
                    gate.record_remote_at(f, now);
                    true
                });
                self.state_changed(changed);
            }

            ChannelEvent::KaraokeQueue(queue) => {
                self.gate.record_remote_at(Field::KaraokeQueue, now);
                if self.state.set_karaoke_queue(queue) {
                    self.state_changed(vec![Field::KaraokeQueue]);
                }
            }

            ChannelEvent::Reaction(payload) => {
                self.add_reaction(&payload.emoji, None, effects);
            }

            ChannelEvent::LyricsUpdate { lyrics, track } => {
                self.load_lyrics(track.as_deref(), &lyrics.unwrap_or_default());
            }
        }
    }

    // ── reconciliation ────────────────────────────────────────────────────────

    fn handle_poll(&mut self, snap: PollSnapshot, now: Instant, effects: &mut Vec<Effect>) {
        let issued_at = snap.issued_at;
        let mut held = Vec::new();
        let mut changed = Vec::new();

        if let Some(current) = snap.current {
            if self.gate.admits_poll_at(Field::CurrentTrack, issued_at, now) {
                self.apply_current(current, None, effects);
            } else {
                held.push(Field::CurrentTrack);
            }
        }

        if let Some(queue) = snap.queue {
            if self.gate.admits_poll_at(Field::Queue, issued_at, now) {
                if self.state.set_queue(queue) {
                    changed.push(Field::Queue);
                }
            } else {
                held.push(Field::Queue);
            }
        }

        if let Some(theme) = snap.theme.as_ref() {
            let gate = &self.gate;
            changed.extend(self.state.apply_theme(theme, |f| {
                let ok = gate.admits_poll_at(f, issued_at, now);
                if !ok {
                    held.push(f);
                }
                ok
            }));
        }

        if let Some(name) = snap.name {
            if self.gate.admits_poll_at(Field::PartyName, issued_at, now) {
                if self.state.set_party_name(Some(name)) {
                    changed.push(Field::PartyName);
                }
            } else {
                held.push(Field::PartyName);
            }
        }

        if let Some(joiner) = snap.joiner {
            if self.last_joiner.as_deref() != Some(joiner.as_str()) {
                info!("SyncCore: {} joined", joiner);
                self.add_reaction(JOIN_EMOJI, Some(joiner.clone()), effects);
                self.last_joiner = Some(joiner);
            }
        }

        if !held.is_empty() {
            let labels: Vec<&str> = held.iter().map(Field::label).collect();
            debug!("SyncCore: poll values held back: {}", labels.join(", "));
        }
        self.state_changed(changed);
    }

    // ── now playing ───────────────────────────────────────────────────────────

    fn apply_current(
        &mut self,
        track: Option<Track>,
        lyrics_override: Option<LyricsPayload>,
        effects: &mut Vec<Effect>,
    ) {
        let transition = self.tracker.observe(track.as_ref());
        if let Transition::Changed { archived: Some(_) } = &transition {
            if let Err(e) = self.store.save_history(self.tracker.history()) {
                warn!("SyncCore: failed to persist history: {}", e);
            }
        }

        let was_playing = self.state.current_track.is_some();
        let track_changed = self.state.current_track != track;
        self.state.current_track = track;
        self.clock.set_track(self.state.current_track.as_ref());

        match transition {
            Transition::Changed { archived } => {
                if let Some(t) = self.state.current_track.as_ref() {
                    info!("SyncCore: now playing '{}' by '{}'", t.name, t.artist);
                }
                self.emit(SurfaceUpdate::NowPlaying {
                    track: self.state.current_track.clone(),
                    archived,
                });
            }
            Transition::Ignored if was_playing => {
                info!("SyncCore: nothing playing");
                self.emit(SurfaceUpdate::NowPlaying {
                    track: None,
                    archived: None,
                });
            }
            _ => {}
        }
        if track_changed {
            self.state_changed(vec![Field::CurrentTrack]);
        }

        let identity = self
            .state
            .current_track
            .as_ref()
            .map(|t| t.identity().to_string());
        if self.lyrics.track() == identity.as_deref() && lyrics_override.is_none() {
            self.repair_lyrics();
            return;
        }

        self.lyrics.reset(identity.as_deref());
        if let Some(t) = self.state.current_track.as_ref() {
            let embedded = lyrics_override
                .or_else(|| t.lyrics.clone())
                .filter(|p| !p.is_empty());
            match embedded {
                Some(payload) => {
                    self.lyrics.load(t.identity(), &payload);
                }
                None if t.name.trim().is_empty() => {
                    self.lyrics.fail(t.identity());
                }
                None => effects.push(Effect::FetchLyrics {
                    track: t.identity().to_string(),
                    name: t.name.clone(),
                    artist: t.artist.clone(),
                }),
            }
        }
        self.lyrics_changed();
    }

    /// Lyrics attached to the playing track after the fact reach us on the
    /// next refresh of that track.
    fn repair_lyrics(&mut self) {
        if !self.lyrics.needs_lyrics() {
            return;
        }
        let Some(payload) = self
            .state
            .current_track
            .as_ref()
            .and_then(|t| t.lyrics.clone())
            .filter(|p| !p.is_empty())
        else {
            return;
        };
        self.load_lyrics(None, &payload);
    }

    /// Load pushed lyrics into `track`, or into the playing track when the
    /// sender did not say which.  Lyrics for any other track are dropped.
    fn load_lyrics(&mut self, track: Option<&str>, payload: &LyricsPayload) {
        let Some(target) = track.or(self.lyrics.track()).map(str::to_string) else {
            debug!("SyncCore: lyrics with nothing playing");
            return;
        };
        if self.lyrics.load(&target, payload) {
            self.lyrics_changed();
        } else {
            debug!("SyncCore: lyrics for {} not applied", target);
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn state_changed(&mut self, fields: Vec<Field>) {
        if fields.is_empty() {
            return;
        }
        self.emit(SurfaceUpdate::State {
            fields: fields.iter().map(Field::label).collect(),
        });
        self.mark(Dirty::All);
    }

    fn lyrics_changed(&mut self) {
        self.emit(SurfaceUpdate::Lyrics {
            status: self.lyrics.state().label(),
        });
        self.mark(Dirty::All);
    }

    fn tick_lyrics(&mut self, wall_ms: i64) {
        let elapsed =
            lyrics::elapsed_secs(self.clock.started_at(), self.state.lyrics_delay_ms, wall_ms);
        if self.lyrics.tick(elapsed) {
            self.emit(SurfaceUpdate::LyricLine {
                active: self.lyrics.active(),
            });
            self.mark(Dirty::All);
        }
    }

    fn add_reaction(&mut self, emoji: &str, label: Option<String>, effects: &mut Vec<Effect>) {
        let reaction = self.reactions.spawn(emoji, label);
        effects.push(Effect::ExpireReaction {
            id: reaction.id,
            after: self.reactions.ttl(),
        });
        self.emit(SurfaceUpdate::ReactionAdded { reaction });
        self.mark(Dirty::All);
    }

    /// Build the render snapshot from current state.
    pub fn snapshot(&self) -> SurfaceView {
        let current = self.state.current_track.as_ref();
        let lyrics = LyricsView {
            status: self.lyrics.state().label(),
            active: self.lyrics.active(),
            window: self.lyrics.window().into_iter().map(Into::into).collect(),
            plain: match self.lyrics.state() {
                LyricsState::Plain(text) => Some(text.clone()),
                _ => None,
            },
        };
        SurfaceView {
            kind: self.kind,
            surface_id: self.surface_id.clone(),
            connection: self.connection,
            state: self.state.clone(),
            history: tracker::without_current(self.tracker.history(), current),
            queue: tracker::without_current(&self.state.queue, current),
            up_next: tracker::next_up(
                self.state.karaoke_mode,
                &self.state.karaoke_queue,
                &self.state.queue,
                current,
            ),
            lyrics,
            progress_pct: self.progress_pct,
            reactions: self.reactions.live(),
            guest: self.guest.clone().map(Into::into),
        }
    }
}

// ── EffectRunner ──────────────────────────────────────────────────────────────

/// Runs effects as detached tasks that report back on `events`.  Every task
/// watches `cancel`, so tearing down the surface stops them all.
#[derive(Clone)]
pub struct EffectRunner {
    api: BackendClient,
    events: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl EffectRunner {
    pub fn new(
        api: BackendClient,
        events: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            events,
            cancel,
        }
    }

    pub fn execute(&self, effect: Effect) {
        match effect {
            Effect::ExpireReaction { id, after } => {
                reactions::schedule_expiry(
                    self.events.clone(),
                    SyncEvent::ReactionExpired(id),
                    after,
                    self.cancel.child_token(),
                );
            }

            Effect::FetchLyrics {
                track,
                name,
                artist,
            } => {
                let api = self.api.clone();
                let events = self.events.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        r = api.lyrics(&name, &artist) => r,
                    };
                    let payload = match result {
                        Ok(p) => Some(p),
                        Err(e) => {
                            warn!("lyrics: lookup for '{}' failed: {}", name, e);
                            None
                        }
                    };
                    let _ = events
                        .send(SyncEvent::LyricsFetched { track, payload })
                        .await;
                });
            }

            Effect::NotifyReaction { emoji } => {
                let api = self.api.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        r = api.notify_reaction(&emoji) => {
                            if let Err(e) = r {
                                debug!("reactions: notify failed: {}", e);
                            }
                        }
                    }
                });
            }

            Effect::AnnounceJoin { guest_id, name } => {
                let api = self.api.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        r = api.join(&guest_id, &name) => {
                            if let Err(e) = r {
                                warn!("join: announce failed: {}", e);
                            }
                        }
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_proto::protocol::{InitPayload, ThemeSnapshot, ViewMode};

    fn core(kind: SurfaceKind) -> (SyncCore, broadcast::Receiver<SurfaceUpdate>) {
        core_with_store(kind, LocalStore::in_memory())
    }

    fn core_with_store(
        kind: SurfaceKind,
        store: LocalStore,
    ) -> (SyncCore, broadcast::Receiver<SurfaceUpdate>) {
        let (tx, rx) = broadcast::channel(256);
        (SyncCore::new(kind, "test", &Config::default(), store, tx), rx)
    }

    fn track(id: &str) -> Track {
        Track::new(id, format!("Song {}", id), "Band")
    }

    fn push(evt: ChannelEvent) -> SyncEvent {
        SyncEvent::Push(evt)
    }

    fn theme(json: &str) -> ThemeSnapshot {
        serde_json::from_str(json).unwrap()
    }

    fn history_ids(core: &SyncCore) -> Vec<String> {
        core.snapshot()
            .history
            .iter()
            .map(|t| t.identity().to_string())
            .collect()
    }

    #[test]
    fn test_local_edit_survives_poll_inside_window() {
        let (mut core, _rx) = core(SurfaceKind::Host);
        let t0 = Instant::now();

        core.handle(SyncEvent::Edit(LocalEdit::ViewMode(ViewMode::Monitor)), t0, 0);
        assert_eq!(core.state.view_mode, ViewMode::Monitor);

        let at_1s = t0 + Duration::from_secs(1);
        let mut poll = PollSnapshot::empty(at_1s);
        poll.theme = Some(theme(r#"{"theme":"standard"}"#));
        core.handle(SyncEvent::Poll(Box::new(poll.clone())), at_1s, 0);
        assert_eq!(core.state.view_mode, ViewMode::Monitor);

        let at_5s = t0 + Duration::from_secs(5);
        poll.issued_at = at_5s;
        core.handle(SyncEvent::Poll(Box::new(poll)), at_5s, 0);
        assert_eq!(core.state.view_mode, ViewMode::Standard);
    }

    #[test]
    fn test_push_is_never_gated() {
        let (mut core, _rx) = core(SurfaceKind::Host);
        let t0 = Instant::now();
        core.handle(SyncEvent::Edit(LocalEdit::KaraokeMode(true)), t0, 0);
        core.handle(
            push(ChannelEvent::ThemeUpdate(theme(r#"{"isKaraokeMode":false}"#))),
            t0 + Duration::from_millis(10),
            0,
        );
        assert!(!core.state.karaoke_mode);
    }

    #[test]
    fn test_init_overrides_local_edit() {
        let (mut core, _rx) = core(SurfaceKind::Host);
        let t0 = Instant::now();
        core.handle(SyncEvent::Edit(LocalEdit::ShowLyrics(true)), t0, 0);

        let init = InitPayload {
            theme: theme(r#"{"theme":"carousel","showLyrics":false}"#),
            current_track: Some(Some(track("a"))),
            current_lyrics: None,
            name: Some("The Pinfold".to_string()),
        };
        let effects = core.handle(
            push(ChannelEvent::Init(Box::new(init))),
            t0 + Duration::from_millis(10),
            0,
        );
        assert!(!core.state.show_lyrics);
        assert_eq!(core.state.view_mode, ViewMode::Carousel);
        assert_eq!(core.state.party_name.as_deref(), Some("The Pinfold"));
        assert_eq!(
            effects,
            vec![Effect::FetchLyrics {
                track: "a".to_string(),
                name: "Song a".to_string(),
                artist: "Band".to_string(),
            }]
        );
    }

    #[test]
    fn test_backend_init_keeps_now_playing() {
        let (mut core, _rx) = core(SurfaceKind::Host);
        let t0 = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), t0, 0);
        assert_eq!(core.snapshot().lyrics.status, "loading");

        let frame = r#"{"type":"INIT","payload":{
            "theme":"standard","youtubeId":null,"isKaraokeMode":false,"karaokeQueue":[],
            "isSpotifyPlaying":true,
            "currentLyrics":{"synced":"[00:01.00]one\n[00:02.00]two","plain":null}
        }}"#;
        let init = ChannelEvent::decode(frame).unwrap().unwrap();
        let effects = core.handle(push(init), t0 + Duration::from_millis(10), 0);
        assert!(effects.is_empty());
        assert_eq!(core.state.current_track.as_ref().map(|t| t.identity()), Some("a"));
        assert_eq!(core.snapshot().lyrics.status, "synced");

        // The INIT did not claim the track, so a poll from before it still lands.
        let mut poll = PollSnapshot::empty(t0);
        poll.current = Some(Some(track("b")));
        core.handle(SyncEvent::Poll(Box::new(poll)), t0 + Duration::from_millis(20), 0);
        assert_eq!(core.state.current_track.as_ref().map(|t| t.identity()), Some("b"));
    }

    #[test]
    fn test_init_with_null_track_clears_now_playing() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let now = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), now, 0);
        let init = ChannelEvent::decode(r#"{"type":"INIT","payload":{"currentTrack":null}}"#)
            .unwrap()
            .unwrap();
        core.handle(push(init), now, 0);
        assert!(core.state.current_track.is_none());
        assert_eq!(core.snapshot().lyrics.status, "idle");
    }

    #[test]
    fn test_poll_repairs_missing_lyrics() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let t0 = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), t0, 0);
        core.handle(
            SyncEvent::LyricsFetched {
                track: "a".to_string(),
                payload: None,
            },
            t0,
            0,
        );
        assert_eq!(core.snapshot().lyrics.status, "unavailable");

        let with_lyrics = track("a").with_lyrics(LyricsPayload {
            synced: Some("[00:01.00]late words".to_string()),
            plain: None,
        });
        let at = t0 + Duration::from_secs(1);
        let mut poll = PollSnapshot::empty(at);
        poll.current = Some(Some(with_lyrics.clone()));
        let effects = core.handle(SyncEvent::Poll(Box::new(poll)), at, 0);
        assert!(effects.is_empty());
        assert_eq!(core.snapshot().lyrics.status, "synced");

        // A later refresh without lyrics keeps them.
        let mut poll = PollSnapshot::empty(at);
        poll.current = Some(Some(track("a")));
        core.handle(SyncEvent::Poll(Box::new(poll)), at, 0);
        assert_eq!(core.snapshot().lyrics.status, "synced");
    }

    #[test]
    fn test_pushed_lyrics_follow_their_track() {
        let (mut core, _rx) = core(SurfaceKind::Guest);
        let now = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), now, 0);
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("b")))), now, 0);

        let late_for_a = ChannelEvent::decode(
            r#"{"type":"LYRICS_UPDATE","payload":{"lyrics":{"plain":"words of a"},"trackUri":"a"}}"#,
        )
        .unwrap()
        .unwrap();
        core.handle(push(late_for_a), now, 0);
        assert_eq!(core.snapshot().lyrics.status, "loading");

        let for_b = ChannelEvent::decode(
            r#"{"type":"LYRICS_UPDATE","payload":{"lyrics":{"plain":"words of b"},"trackUri":"b"}}"#,
        )
        .unwrap()
        .unwrap();
        core.handle(push(for_b), now, 0);
        let view = core.snapshot();
        assert_eq!(view.lyrics.status, "plain");
        assert_eq!(view.lyrics.plain.as_deref(), Some("words of b"));
    }

    #[test]
    fn test_stale_poll_loses_to_newer_push() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let t0 = Instant::now();
        core.handle(
            push(ChannelEvent::CurrentTrack(Some(track("new")))),
            t0 + Duration::from_millis(100),
            0,
        );

        let mut poll = PollSnapshot::empty(t0);
        poll.current = Some(Some(track("old")));
        poll.queue = Some(vec![track("q1")]);
        core.handle(SyncEvent::Poll(Box::new(poll)), t0 + Duration::from_millis(200), 0);

        assert_eq!(core.state.current_track.as_ref().map(|t| t.identity()), Some("new"));
        assert_eq!(core.state.queue.len(), 1);
    }

    #[test]
    fn test_history_follows_transitions() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let t0 = Instant::now();
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            core.handle(
                push(ChannelEvent::CurrentTrack(Some(track(id)))),
                t0 + Duration::from_secs(i as u64),
                0,
            );
            if id == "b" {
                assert_eq!(history_ids(&core), vec!["a"]);
            }
        }
        assert_eq!(history_ids(&core), vec!["a", "b"]);

        // Null keeps the history and the previous track.
        core.handle(push(ChannelEvent::CurrentTrack(None)), t0 + Duration::from_secs(4), 0);
        assert!(core.state.current_track.is_none());
        assert_eq!(core.snapshot().lyrics.status, "idle");
        core.handle(
            push(ChannelEvent::CurrentTrack(Some(track("c")))),
            t0 + Duration::from_secs(5),
            0,
        );
        assert_eq!(history_ids(&core), vec!["a", "b"]);
        assert_eq!(core.snapshot().lyrics.status, "loading");
    }

    #[test]
    fn test_history_persists_for_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::for_surface(dir.path(), "proj");
            let (mut core, _rx) = core_with_store(SurfaceKind::Projector, store);
            let t0 = Instant::now();
            for id in ["t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8"] {
                core.handle(push(ChannelEvent::CurrentTrack(Some(track(id)))), t0, 0);
            }
        }
        let store = LocalStore::for_surface(dir.path(), "proj");
        let (core, _rx) = core_with_store(SurfaceKind::Projector, store);
        assert_eq!(history_ids(&core), vec!["t3", "t4", "t5", "t6", "t7"]);
    }

    #[test]
    fn test_embedded_lyrics_skip_fetch_and_track_lines() {
        let (mut core, mut rx) = core(SurfaceKind::Projector);
        let t = track("a")
            .with_timing(10_000, 200_000)
            .with_lyrics(LyricsPayload {
                synced: Some("[00:01.00]one\n[00:03.00]two\n[00:05.00]three".to_string()),
                plain: None,
            });
        let effects = core.handle(push(ChannelEvent::CurrentTrack(Some(t))), Instant::now(), 0);
        assert!(effects.is_empty());
        assert_eq!(core.snapshot().lyrics.status, "synced");

        core.handle(SyncEvent::LyricsTick, Instant::now(), 13_500);
        let view = core.snapshot();
        assert_eq!(view.lyrics.active, Some(1));
        assert!(view.lyrics.window.iter().any(|l| l.active && l.text == "two"));

        let mut saw_line = false;
        while let Ok(update) = rx.try_recv() {
            if let SurfaceUpdate::LyricLine { active } = update {
                assert_eq!(active, Some(1));
                saw_line = true;
            }
        }
        assert!(saw_line);
    }

    #[test]
    fn test_lyrics_delay_shifts_active_line() {
        let (mut core, _rx) = core(SurfaceKind::Guest);
        let t = track("a").with_timing(0, 60_000).with_lyrics(LyricsPayload {
            synced: Some("[00:02.00]x\n[00:04.00]y".to_string()),
            plain: None,
        });
        let now = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(t))), now, 0);
        core.handle(
            push(ChannelEvent::ThemeUpdate(theme(r#"{"lyricsDelayMs":1500}"#))),
            now,
            0,
        );
        core.handle(SyncEvent::LyricsTick, now, 4_500);
        assert_eq!(core.lyrics.active(), Some(0));
    }

    #[test]
    fn test_fetched_lyrics_for_old_track_are_dropped() {
        let (mut core, _rx) = core(SurfaceKind::Guest);
        let now = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), now, 0);
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("b")))), now, 0);

        core.handle(
            SyncEvent::LyricsFetched {
                track: "a".to_string(),
                payload: Some(LyricsPayload {
                    synced: None,
                    plain: Some("old words".to_string()),
                }),
            },
            now,
            0,
        );
        assert_eq!(core.snapshot().lyrics.status, "loading");

        core.handle(
            SyncEvent::LyricsFetched {
                track: "b".to_string(),
                payload: None,
            },
            now,
            0,
        );
        assert_eq!(core.snapshot().lyrics.status, "unavailable");
    }

    #[test]
    fn test_reaction_paths() {
        let (mut core, _rx) = core(SurfaceKind::Guest);
        let now = Instant::now();

        let effects = core.handle(SyncEvent::TriggerReaction("🔥".to_string()), now, 0);
        assert_eq!(effects.len(), 2);
        let Effect::ExpireReaction { id, after } = effects[0].clone() else {
            panic!("expected expiry first, got {:?}", effects);
        };
        assert_eq!(after, Duration::from_secs(4));
        assert_eq!(
            effects[1],
            Effect::NotifyReaction {
                emoji: "🔥".to_string()
            }
        );
        assert_eq!(core.snapshot().reactions.len(), 1);

        let received: jukebox_proto::protocol::ReactionPayload =
            serde_json::from_str(r#"{"id":1,"emoji":"🎉"}"#).unwrap();
        let effects = core.handle(push(ChannelEvent::Reaction(received)), now, 0);
        assert!(matches!(effects.as_slice(), [Effect::ExpireReaction { .. }]));
        assert_eq!(core.snapshot().reactions.len(), 2);

        core.handle(SyncEvent::ReactionExpired(id), now, 0);
        core.handle(SyncEvent::ReactionExpired(id), now, 0);
        let live = core.snapshot().reactions;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].emoji, "🎉");
    }

    #[test]
    fn test_join_notice_once_per_name() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let now = Instant::now();
        let mut poll = PollSnapshot::empty(now);
        poll.joiner = Some("Robin".to_string());

        let effects = core.handle(SyncEvent::Poll(Box::new(poll.clone())), now, 0);
        assert_eq!(effects.len(), 1);
        let live = core.snapshot().reactions;
        assert_eq!(live[0].emoji, JOIN_EMOJI);
        assert_eq!(live[0].label.as_deref(), Some("Robin"));

        assert!(core.handle(SyncEvent::Poll(Box::new(poll)), now, 0).is_empty());
    }

    #[test]
    fn test_join_persists_guest_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::for_surface(dir.path(), "phone");
        let (mut core, _rx) = core_with_store(SurfaceKind::Guest, store);
        let guest_id = core.snapshot().guest.unwrap().id;

        let effects = core.handle(SyncEvent::Join("Robin".to_string()), Instant::now(), 0);
        assert_eq!(
            effects,
            vec![Effect::AnnounceJoin {
                guest_id: guest_id.clone(),
                name: "Robin".to_string()
            }]
        );

        let mut reopened = LocalStore::for_surface(dir.path(), "phone");
        let identity = reopened.guest_identity();
        assert_eq!(identity.id, guest_id);
        assert_eq!(identity.name, "Robin");
    }

    #[test]
    fn test_up_next_and_dedup_in_view() {
        let (mut core, _rx) = core(SurfaceKind::Projector);
        let now = Instant::now();
        core.handle(push(ChannelEvent::CurrentTrack(Some(track("a")))), now, 0);
        core.handle(
            push(ChannelEvent::QueueUpdate(vec![track("a"), track("b")])),
            now,
            0,
        );
        let view = core.snapshot();
        assert_eq!(view.queue.len(), 1);
        assert_eq!(
            view.up_next,
            Some(tracker::UpNext::Track {
                name: "Song b".to_string(),
                artist: "Band".to_string()
            })
        );
    }

    #[test]
    fn test_progress_tick() {
        let (mut core, mut rx) = core(SurfaceKind::Projector);
        let now = Instant::now();
        let t = track("a").with_timing(1_000, 10_000);
        core.handle(push(ChannelEvent::CurrentTrack(Some(t))), now, 0);
        while rx.try_recv().is_ok() {}

        core.handle(SyncEvent::ProgressTick(ProgressTier::Coarse), now, 6_000);
        match rx.try_recv().unwrap() {
            SurfaceUpdate::Progress { tier, pct } => {
                assert_eq!(tier, ProgressTier::Coarse);
                assert_eq!(pct, 50.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(core.snapshot().progress_pct, 50.0);
    }

    #[tokio::test]
    async fn test_run_publishes_view_and_stops() {
        let (updates, _rx) = broadcast::channel(64);
        let core = SyncCore::new(
            SurfaceKind::Projector,
            "run",
            &Config::default(),
            LocalStore::in_memory(),
            updates,
        );
        let view = core.view();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let api = BackendClient::new(&Config::default().backend).unwrap();
        let runner = EffectRunner::new(api, tx.clone(), cancel.clone());
        let handle = tokio::spawn(core.run(rx, runner));

        tx.send(push(ChannelEvent::QueueUpdate(vec![track("q")])))
            .await
            .unwrap();
        tx.send(SyncEvent::Channel(ChannelStatus::Connected))
            .await
            .unwrap();
        tx.send(SyncEvent::Shutdown).await.unwrap();
        handle.await.unwrap();
        cancel.cancel();

        let view = view.read().await;
        assert_eq!(view.queue.len(), 1);
        assert_eq!(view.connection, ChannelStatus::Connected);
    }
}
