//! Lifecycle handle for one mirroring surface.
//!
//! `Surface::open` wires the sync core to its inputs: the push channel, the
//! poller and the tick tasks.  Each runs as its own task under a child of
//! the surface's cancellation token.  `close` stops all of them in one step;
//! dropping the handle cancels them too.

use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::config::{Config, SurfaceKind};
use jukebox_proto::store::LocalStore;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::BackendClient;
use crate::channel::EventChannel;
use crate::clock::ProgressTier;
use crate::core::{EffectRunner, SurfaceUpdate, SyncCore, SyncEvent};
use crate::error::SyncResult;
use crate::poller::Poller;
use crate::state::{LocalEdit, SurfaceView};

const EVENT_QUEUE: usize = 256;
const UPDATE_QUEUE: usize = 256;

pub struct Surface {
    kind: SurfaceKind,
    surface_id: String,
    events: mpsc::Sender<SyncEvent>,
    view: Arc<RwLock<SurfaceView>>,
    updates: broadcast::Sender<SurfaceUpdate>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Surface {
    /// Open a surface whose local store lives under the configured data
    /// directory.
    pub fn open(kind: SurfaceKind, surface_id: &str, config: &Config) -> SyncResult<Self> {
        let store = LocalStore::for_surface(&config.paths.data_dir, surface_id);
        Self::open_with_store(kind, surface_id, config, store)
    }

    pub fn open_with_store(
        kind: SurfaceKind,
        surface_id: &str,
        config: &Config,
        store: LocalStore,
    ) -> SyncResult<Self> {
        let api = BackendClient::new(&config.backend)?;
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);
        let cancel = CancellationToken::new();

        let core = SyncCore::new(kind, surface_id, config, store, updates.clone());
        let view = core.view();
        let runner = EffectRunner::new(api.clone(), events.clone(), cancel.child_token());

        let mut tasks = vec![
            ("core", tokio::spawn(core.run(events_rx, runner))),
            (
                "channel",
                EventChannel::spawn(
                    api.clone(),
                    config.channel.clone(),
                    events.clone(),
                    cancel.child_token(),
                ),
            ),
            (
                "poller",
                Poller::spawn(
                    api,
                    config.poll_interval(kind),
                    events.clone(),
                    cancel.child_token(),
                ),
            ),
            (
                "lyrics-tick",
                spawn_ticker(
                    Duration::from_millis(config.timing.lyrics_tick_ms),
                    events.clone(),
                    cancel.child_token(),
                    || SyncEvent::LyricsTick,
                ),
            ),
            (
                "progress-coarse",
                spawn_ticker(
                    Duration::from_millis(config.timing.coarse_progress_ms),
                    events.clone(),
                    cancel.child_token(),
                    || SyncEvent::ProgressTick(ProgressTier::Coarse),
                ),
            ),
        ];
        // Frame-rate progress drives the projector's large visuals only.
        if kind == SurfaceKind::Projector && config.timing.frame_progress_ms > 0 {
            tasks.push((
                "progress-frame",
                spawn_ticker(
                    Duration::from_millis(config.timing.frame_progress_ms),
                    events.clone(),
                    cancel.child_token(),
                    || SyncEvent::ProgressTick(ProgressTier::Frame),
                ),
            ));
        }

        info!(
            "surface: opened {} '{}' against {}",
            kind.label(),
            surface_id,
            config.backend.base_url
        );

        Ok(Self {
            kind,
            surface_id: surface_id.to_string(),
            events,
            view,
            updates,
            cancel,
            tasks,
        })
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn surface_id(&self) -> &str {
        &self.surface_id
    }

    /// Current render snapshot.
    pub async fn view(&self) -> SurfaceView {
        self.view.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceUpdate> {
        self.updates.subscribe()
    }

    /// Show a reaction here and tell the backend about it.
    pub async fn trigger_reaction(&self, emoji: &str) {
        self.send(SyncEvent::TriggerReaction(emoji.to_string())).await;
    }

    /// Set this guest's display name and announce it.
    pub async fn join(&self, name: &str) {
        self.send(SyncEvent::Join(name.to_string())).await;
    }

    /// Apply an edit locally ahead of the backend; polls will not revert it
    /// inside the stability window.
    pub async fn edit(&self, edit: LocalEdit) {
        self.send(SyncEvent::Edit(edit)).await;
    }

    async fn send(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            warn!("surface: core for '{}' is gone", self.surface_id);
        }
    }

    /// Stop every task and wait for them to finish.
    pub async fn close(mut self) {
        let _ = self.events.send(SyncEvent::Shutdown).await;
        self.cancel.cancel();
        for (name, handle) in std::mem::take(&mut self.tasks) {
            if let Err(e) = handle.await {
                warn!("surface: {} task failed: {}", name, e);
            } else {
                debug!("surface: {} task stopped", name);
            }
        }
        info!("surface: closed '{}'", self.surface_id);
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send `make()` every `period` until cancelled.  A full queue skips the
/// tick rather than piling up stale ones.
fn spawn_ticker(
    period: Duration,
    sink: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
    make: fn() -> SyncEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match sink.try_send(make()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}
