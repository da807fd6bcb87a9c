//! Request/response client for the jukebox backend.

use jukebox_proto::config::BackendConfig;
use jukebox_proto::protocol::{LyricsPayload, LyricsResponse, NameResponse, ThemeSnapshot, Track};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

const USER_AGENT: &str = concat!("jukebox-surface/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct BackendClient {
    /// Bounded client for request/response calls.
    http: reqwest::Client,
    /// Client for the long-lived event stream: connect timeout only.
    stream: reqwest::Client,
    base: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> SyncResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| SyncError::Http {
                endpoint: "client",
                source,
            })?;
        let stream = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .build()
            .map_err(|source| SyncError::Http {
                endpoint: "client",
                source,
            })?;
        Ok(Self {
            http,
            stream,
            base: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> SyncResult<T> {
        let response = request
            .send()
            .await
            .map_err(|source| SyncError::Http { endpoint, source })?;
        if !response.status().is_success() {
            return Err(SyncError::Status {
                endpoint,
                status: response.status(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| SyncError::Http { endpoint, source })?;
        serde_json::from_slice(&body).map_err(|e| SyncError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }

    async fn post_json(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> SyncResult<()> {
        let response = self
            .http
            .post(self.url(endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|source| SyncError::Http { endpoint, source })?;
        if !response.status().is_success() {
            return Err(SyncError::Status {
                endpoint,
                status: response.status(),
            });
        }
        Ok(())
    }

    /// `GET /current`; `None` means nothing is playing.
    pub async fn current(&self) -> SyncResult<Option<Track>> {
        self.get_json("/current", self.http.get(self.url("/current")))
            .await
    }

    pub async fn queue(&self) -> SyncResult<Vec<Track>> {
        self.get_json("/queue", self.http.get(self.url("/queue"))).await
    }

    pub async fn theme(&self) -> SyncResult<ThemeSnapshot> {
        self.get_json("/theme", self.http.get(self.url("/theme"))).await
    }

    pub async fn party_name(&self) -> SyncResult<Option<String>> {
        let name: NameResponse = self
            .get_json("/name", self.http.get(self.url("/name")))
            .await?;
        Ok(name.name.filter(|n| !n.trim().is_empty()))
    }

    /// `GET /join-event`: name of the latest guest to join, if still fresh.
    pub async fn join_event(&self) -> SyncResult<Option<String>> {
        let name: NameResponse = self
            .get_json("/join-event", self.http.get(self.url("/join-event")))
            .await?;
        Ok(name.name.filter(|n| !n.trim().is_empty()))
    }

    /// `GET /lyrics?track=&artist=`.
    pub async fn lyrics(&self, track: &str, artist: &str) -> SyncResult<LyricsPayload> {
        debug!("api: lyrics lookup '{}' by '{}'", track, artist);
        let request = self
            .http
            .get(self.url("/lyrics"))
            .query(&[("track", track), ("artist", artist)]);
        let response: LyricsResponse = self.get_json("/lyrics", request).await?;
        Ok(response.into())
    }

    /// `POST /reaction-event` so other surfaces see the reaction.
    pub async fn notify_reaction(&self, emoji: &str) -> SyncResult<()> {
        self.post_json("/reaction-event", serde_json::json!({ "emoji": emoji }))
            .await
    }

    /// `POST /join` announcing a guest's display name.
    pub async fn join(&self, guest_id: &str, name: &str) -> SyncResult<()> {
        self.post_json(
            "/join",
            serde_json::json!({ "guestId": guest_id, "name": name }),
        )
        .await
    }

    /// Open the `GET /events` push stream.  The caller owns the body.
    pub async fn open_events(&self) -> SyncResult<reqwest::Response> {
        let endpoint = "/events";
        let response = self
            .stream
            .get(self.url(endpoint))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|source| SyncError::Http { endpoint, source })?;
        if !response.status().is_success() {
            return Err(SyncError::Status {
                endpoint,
                status: response.status(),
            });
        }
        Ok(response)
    }
}
