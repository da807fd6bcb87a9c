//! Push channel: the backend's `/events` server-sent-event stream.
//!
//! One task per surface holds the subscription, decodes frames into
//! `ChannelEvent`s and forwards them to the core.  When the stream ends or
//! cannot be opened the task re-subscribes after a jittered, growing delay.
//! Decoding problems never reach the core; they are logged and dropped.

use futures_util::StreamExt;
use jukebox_proto::config::ChannelConfig;
use jukebox_proto::protocol::ChannelEvent;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::BackendClient;
use crate::core::SyncEvent;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
}

// ── SSE framing ───────────────────────────────────────────────────────────────

/// Longest line buffered while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` decoder.  Feed raw body chunks; get back
/// the `data` payload of every event completed by that chunk.
///
/// A line longer than the limit is dropped along with the event it belongs
/// to, and decoding resumes after its newline.
#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    limit: usize,
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.data.push(value.to_string());
            }
            // event:, id:, retry: carry nothing this client uses.
        }

        if self.pending.len() > self.limit {
            warn!("channel: dropping event line over {} bytes", self.limit);
            self.pending.clear();
            self.data.clear();
            self.discarding = true;
        }
        events
    }
}

// ── Reconnect policy ──────────────────────────────────────────────────────────

/// Exponential reconnect delay with jitter.  Each delay is drawn uniformly
/// between the initial delay and the current cap; the cap doubles per
/// failed attempt up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        )
    }

    /// Current upper bound, before jitter.
    pub fn cap(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let cap = self.cap();
        self.attempt = self.attempt.saturating_add(1);
        if cap <= self.initial {
            return cap;
        }
        let low = self.initial.as_millis() as u64;
        let high = cap.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ── Subscription task ─────────────────────────────────────────────────────────

pub struct EventChannel;

impl EventChannel {
    /// Hold a subscription open until `cancel` fires or the core goes away.
    pub fn spawn(
        api: BackendClient,
        config: ChannelConfig,
        sink: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::from_config(&config);

            loop {
                let opened = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = api.open_events() => r,
                };

                match opened {
                    Ok(response) => {
                        info!("channel: subscribed to {}/events", api.base_url());
                        if sink
                            .send(SyncEvent::Channel(ChannelStatus::Connected))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        let (frames, result) = pump(response, &sink, &cancel).await;
                        if cancel.is_cancelled() || sink.is_closed() {
                            break;
                        }
                        let _ = sink
                            .send(SyncEvent::Channel(ChannelStatus::Disconnected))
                            .await;
                        if let Err(e) = result {
                            warn!("channel: {}", e);
                        }
                        if frames > 0 {
                            backoff.reset();
                        }
                    }
                    Err(e) => {
                        if e.is_transient() {
                            debug!("channel: connect failed: {}", e);
                        } else {
                            warn!("channel: connect failed: {}", e);
                        }
                    }
                }

                let delay = backoff.next_delay();
                debug!("channel: reconnecting in {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            debug!("channel: subscription task finished");
        })
    }
}

/// Forward frames until the body ends.  Returns the number of frames seen
/// and how the stream ended.
async fn pump(
    response: reqwest::Response,
    sink: &mpsc::Sender<SyncEvent>,
    cancel: &CancellationToken,
) -> (usize, Result<(), SyncError>) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut frames = 0usize;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return (frames, Ok(())),
            c = stream.next() => c,
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(source)) => {
                let err = SyncError::Http {
                    endpoint: "/events",
                    source,
                };
                return (frames, Err(err));
            }
            None => {
                debug!("channel: stream ended after {} frames", frames);
                return (frames, Err(SyncError::StreamClosed));
            }
        };

        for data in decoder.feed(&bytes) {
            frames += 1;
            match ChannelEvent::decode(&data) {
                Ok(Some(evt)) => {
                    debug!("channel: {}", evt.kind());
                    if sink.send(SyncEvent::Push(evt)).await.is_err() {
                        return (frames, Ok(()));
                    }
                }
                Ok(None) => debug!("channel: ignoring unknown event type"),
                Err(e) => debug!("channel: dropping malformed frame: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_splits_on_blank_line() {
        let mut dec = SseDecoder::new();
        let out = dec.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
        let out = dec.feed(b"\n");
        assert_eq!(out, vec!["{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"da").is_empty());
        assert!(dec.feed(b"ta: hel").is_empty());
        let out = dec.feed(b"lo\r\n\r\n");
        assert_eq!(out, vec!["hello".to_string()]);
    }

    #[test]
    fn test_decoder_skips_comments_and_other_fields() {
        let mut dec = SseDecoder::new();
        let out = dec.feed(b": keepalive\n\nevent: update\nid: 4\ndata:x\ndata: y\n\n");
        assert_eq!(out, vec!["x\ny".to_string()]);
    }

    #[test]
    fn test_decoder_keeps_multibyte_across_chunks() {
        let mut dec = SseDecoder::new();
        let frame = "data: {\"emoji\":\"🔥\"}\n\n".as_bytes();
        let (a, b) = frame.split_at(17);
        assert!(dec.feed(a).is_empty());
        assert_eq!(dec.feed(b), vec!["{\"emoji\":\"🔥\"}".to_string()]);
    }

    #[test]
    fn test_decoder_drops_oversized_line_and_recovers() {
        let mut dec = SseDecoder::with_limit(16);
        assert!(dec.feed(b"data: partial\n").is_empty());
        let long = format!("data: {}", "x".repeat(40));
        assert!(dec.feed(long.as_bytes()).is_empty());
        assert!(dec.pending.is_empty());
        assert!(dec.data.is_empty());
        assert_eq!(dec.feed(b"yyy\n\ndata: ok\n\n"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_default_limit_survives_long_garbage() {
        let mut dec = SseDecoder::new();
        let junk = vec![b'z'; MAX_LINE_BYTES + 1];
        assert!(dec.feed(&junk).is_empty());
        assert!(dec.pending.is_empty());
        assert_eq!(dec.feed(b"\ndata: x\n\n"), vec!["x".to_string()]);
    }

    #[test]
    fn test_backoff_grows_and_is_bounded() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_millis(4_000));
        let mut caps = Vec::new();
        for _ in 0..8 {
            let cap = b.cap();
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(500));
            assert!(d <= cap);
            caps.push(cap.as_millis());
        }
        assert_eq!(caps, vec![500, 1000, 2000, 4000, 4000, 4000, 4000, 4000]);

        b.reset();
        assert_eq!(b.cap(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_survives_many_attempts() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(15));
        for _ in 0..100 {
            assert!(b.next_delay() <= Duration::from_secs(15));
        }
    }
}
