//! Periodic full-state pull.  Covers whatever the push channel missed.

use jukebox_proto::protocol::{ThemeSnapshot, Track};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::BackendClient;
use crate::core::SyncEvent;
use crate::error::SyncResult;

/// One reconciliation cycle.  Each field is `None` when its request failed;
/// the core leaves the matching state untouched.
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub issued_at: Instant,
    /// `Some(None)` means the backend reports nothing playing.
    pub current: Option<Option<Track>>,
    pub queue: Option<Vec<Track>>,
    pub theme: Option<ThemeSnapshot>,
    pub name: Option<String>,
    /// Latest joiner, if the backend still advertises one.
    pub joiner: Option<String>,
}

impl PollSnapshot {
    pub fn empty(issued_at: Instant) -> Self {
        Self {
            issued_at,
            current: None,
            queue: None,
            theme: None,
            name: None,
            joiner: None,
        }
    }
}

fn settle<T>(endpoint: &str, result: SyncResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("poller: {} skipped: {}", endpoint, e);
            None
        }
    }
}

/// Issue every pull concurrently and collect what came back.
pub async fn poll_once(api: &BackendClient) -> PollSnapshot {
    let issued_at = Instant::now();
    let (current, queue, theme, name, joiner) = tokio::join!(
        api.current(),
        api.queue(),
        api.theme(),
        api.party_name(),
        api.join_event(),
    );
    PollSnapshot {
        issued_at,
        current: settle("/current", current),
        queue: settle("/queue", queue),
        theme: settle("/theme", theme),
        name: settle("/name", name).flatten(),
        joiner: settle("/join-event", joiner).flatten(),
    }
}

pub struct Poller;

impl Poller {
    /// First cycle runs immediately, then every `period`.
    pub fn spawn(
        api: BackendClient,
        period: Duration,
        sink: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    s = poll_once(&api) => s,
                };
                if sink.send(SyncEvent::Poll(Box::new(snapshot))).await.is_err() {
                    break;
                }
            }
            debug!("poller: stopped");
        })
    }
}
