//! Short-lived audience reactions floating over a surface.

use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Emoji shown when a guest joins.
pub const JOIN_EMOJI: &str = "👋";

/// Percent of surface width; reactions never spawn at the edges.
pub const LATERAL_MIN: f32 = 10.0;
pub const LATERAL_MAX: f32 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reaction {
    pub id: u64,
    pub emoji: String,
    /// Caption, set for join notices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub lateral: f32,
    #[serde(skip)]
    pub spawned_at: Instant,
}

pub struct ReactionBroadcast {
    next_id: u64,
    live: VecDeque<Reaction>,
    ttl: Duration,
}

impl ReactionBroadcast {
    pub fn new(ttl: Duration) -> Self {
        Self {
            next_id: 1,
            live: VecDeque::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add a reaction at a random lateral position.
    pub fn spawn(&mut self, emoji: impl Into<String>, label: Option<String>) -> Reaction {
        let lateral = rand::thread_rng().gen_range(LATERAL_MIN..=LATERAL_MAX);
        self.spawn_at(emoji, label, lateral, Instant::now())
    }

    pub fn spawn_at(
        &mut self,
        emoji: impl Into<String>,
        label: Option<String>,
        lateral: f32,
        now: Instant,
    ) -> Reaction {
        let reaction = Reaction {
            id: self.next_id,
            emoji: emoji.into(),
            label,
            lateral: lateral.clamp(LATERAL_MIN, LATERAL_MAX),
            spawned_at: now,
        };
        self.next_id += 1;
        self.live.push_back(reaction.clone());
        reaction
    }

    /// Remove one reaction.  Unknown ids are ignored.
    pub fn expire(&mut self, id: u64) -> bool {
        let before = self.live.len();
        self.live.retain(|r| r.id != id);
        self.live.len() != before
    }

    pub fn live(&self) -> Vec<Reaction> {
        self.live.iter().cloned().collect()
    }
}

/// Sleep for `ttl`, then deliver `event` on `tx`.  The sleeper is its own
/// task so expiry needs no sweep from the owner.
pub fn schedule_expiry<E: Send + 'static>(
    tx: mpsc::Sender<E>,
    event: E,
    ttl: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(ttl) => {
                let _ = tx.send(event).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_lateral_bounded() {
        let mut rb = ReactionBroadcast::new(Duration::from_secs(4));
        let mut last = 0;
        for _ in 0..50 {
            let r = rb.spawn("🔥", None);
            assert!(r.id > last);
            assert!((LATERAL_MIN..=LATERAL_MAX).contains(&r.lateral));
            last = r.id;
        }
        assert_eq!(rb.live().len(), 50);
    }

    #[test]
    fn test_expire_unknown_is_ignored() {
        let mut rb = ReactionBroadcast::new(Duration::from_secs(4));
        let r = rb.spawn("🎉", None);
        assert!(!rb.expire(r.id + 100));
        assert!(rb.expire(r.id));
        assert!(!rb.expire(r.id));
        assert!(rb.live().is_empty());
    }

    #[test]
    fn test_lateral_is_clamped_and_order_kept() {
        let t0 = Instant::now();
        let mut rb = ReactionBroadcast::new(Duration::from_secs(4));
        let a = rb.spawn_at("a", None, 2.0, t0);
        let b = rb.spawn_at("b", Some("Robin".to_string()), 120.0, t0);
        assert_eq!(a.lateral, LATERAL_MIN);
        assert_eq!(b.lateral, LATERAL_MAX);

        let live = rb.live();
        assert_eq!(live, vec![a, b]);
        assert_eq!(live[1].label.as_deref(), Some("Robin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaction_expires_without_cleanup() {
        let (tx, mut rx) = mpsc::channel::<u64>(4);
        let mut rb = ReactionBroadcast::new(Duration::from_secs(4));
        let r = rb.spawn("🔥", None);
        let _sleeper = schedule_expiry(tx, r.id, rb.ttl(), CancellationToken::new());
        assert_eq!(rb.live(), vec![r.clone()]);

        tokio::time::advance(Duration::from_millis(3_900)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(rb.live().len(), 1);

        let id = rx.recv().await.unwrap();
        assert!(rb.expire(id));
        assert!(rb.live().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sleeper_sends_nothing() {
        let (tx, mut rx) = mpsc::channel::<u64>(1);
        let cancel = CancellationToken::new();
        let sleeper = schedule_expiry(tx, 7, Duration::from_secs(4), cancel.clone());
        cancel.cancel();
        sleeper.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
