use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

/// The three classes of surface that mirror the backend.  They differ only in
/// how aggressively they poll and how long a local edit is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Host,
    Guest,
    Projector,
}

impl SurfaceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SurfaceKind::Host => "host",
            SurfaceKind::Guest => "guest",
            SurfaceKind::Projector => "projector",
        }
    }
}

impl std::str::FromStr for SurfaceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(SurfaceKind::Host),
            "guest" => Ok(SurfaceKind::Guest),
            "projector" => Ok(SurfaceKind::Projector),
            other => anyhow::bail!("unknown surface kind '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API base; endpoint paths (`/current`, `/events`, ...) are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for request/response calls.  The event stream has none.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Push-channel reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

/// Reconciliation poll cadence per surface kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_host_poll_secs")]
    pub host_interval_secs: u64,
    #[serde(default = "default_guest_poll_secs")]
    pub guest_interval_secs: u64,
    #[serde(default = "default_projector_poll_secs")]
    pub projector_interval_secs: u64,
}

/// How long a local edit shields its field from poll results, per kind.
/// Host and guest surfaces were tuned separately, so both stay adjustable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    #[serde(default = "default_host_window_ms")]
    pub host_window_ms: u64,
    #[serde(default = "default_guest_window_ms")]
    pub guest_window_ms: u64,
    #[serde(default = "default_projector_window_ms")]
    pub projector_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Active lyric line recomputation period.
    #[serde(default = "default_lyrics_tick_ms")]
    pub lyrics_tick_ms: u64,
    /// Low-frequency progress tier (thin progress bars).
    #[serde(default = "default_coarse_progress_ms")]
    pub coarse_progress_ms: u64,
    /// Frame-synchronised progress tier (large visual elements).
    #[serde(default = "default_frame_progress_ms")]
    pub frame_progress_ms: u64,
    #[serde(default = "default_reaction_ttl_ms")]
    pub reaction_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for per-surface stores and the log file.
    #[serde(default = "platform::data_dir")]
    pub data_dir: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            host_interval_secs: default_host_poll_secs(),
            guest_interval_secs: default_guest_poll_secs(),
            projector_interval_secs: default_projector_poll_secs(),
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            host_window_ms: default_host_window_ms(),
            guest_window_ms: default_guest_window_ms(),
            projector_window_ms: default_projector_window_ms(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            lyrics_tick_ms: default_lyrics_tick_ms(),
            coarse_progress_ms: default_coarse_progress_ms(),
            frame_progress_ms: default_frame_progress_ms(),
            reaction_ttl_ms: default_reaction_ttl_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: platform::data_dir(),
        }
    }
}

fn default_base_url() -> String {
    platform::DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    15_000
}

fn default_host_poll_secs() -> u64 {
    10
}

fn default_guest_poll_secs() -> u64 {
    3
}

fn default_projector_poll_secs() -> u64 {
    5
}

fn default_host_window_ms() -> u64 {
    4000
}

fn default_guest_window_ms() -> u64 {
    3000
}

fn default_projector_window_ms() -> u64 {
    3000
}

fn default_lyrics_tick_ms() -> u64 {
    100
}

fn default_coarse_progress_ms() -> u64 {
    1000
}

fn default_frame_progress_ms() -> u64 {
    16
}

fn default_reaction_ttl_ms() -> u64 {
    4000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn poll_interval(&self, kind: SurfaceKind) -> Duration {
        let secs = match kind {
            SurfaceKind::Host => self.polling.host_interval_secs,
            SurfaceKind::Guest => self.polling.guest_interval_secs,
            SurfaceKind::Projector => self.polling.projector_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn stability_window(&self, kind: SurfaceKind) -> Duration {
        let ms = match kind {
            SurfaceKind::Host => self.stability.host_window_ms,
            SurfaceKind::Guest => self.stability.guest_window_ms,
            SurfaceKind::Projector => self.stability.projector_window_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms.max(1))
    }
}
