//! Per-surface durable key/value store.
//!
//! Plays the role of browser local storage: one small JSON object per
//! surface, surviving restarts, never shared with other surfaces.  Values
//! are kept in memory and the whole object is rewritten on every `set`.

use crate::platform;
use crate::protocol::Track;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const HISTORY_KEY: &str = "jukebox_history";
pub const GUEST_ID_KEY: &str = "jukebox_guest_id";
pub const GUEST_NAME_KEY: &str = "jukebox_guest_name";
pub const HOST_AUTH_KEY: &str = "jukebox_host_authorized";

/// Recently played tracks kept per surface.
pub const HISTORY_LIMIT: usize = 5;

pub const DEFAULT_GUEST_NAME: &str = "Guest";

const STORE_FILE: &str = "store.json";

/// Identity a guest surface presents to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestIdentity {
    pub id: String,
    pub name: String,
    /// False until the guest picks a display name.
    pub has_custom_name: bool,
}

pub struct LocalStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, serde_json::Value>,
}

impl LocalStore {
    /// Open (or lazily create) the store file at `path`.  A missing or
    /// unreadable file yields an empty store.
    pub fn open(path: PathBuf) -> Self {
        let entries = Self::load_entries(&path);
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn for_surface(data_dir: &Path, surface_id: &str) -> Self {
        Self::open(platform::surface_dir(data_dir, surface_id).join(STORE_FILE))
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("store: ignoring unreadable value for '{}': {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        self.entries
            .insert(key.to_string(), serde_json::to_value(value)?);
        self.save()
    }

    // ── History ──────────────────────────────────────────────────────────────

    /// Persisted history, oldest first, clipped to `HISTORY_LIMIT`.
    /// Unreadable entries are skipped one by one.
    pub fn history(&self) -> Vec<Track> {
        let raw: Vec<serde_json::Value> = self.get(HISTORY_KEY).unwrap_or_default();
        let mut tracks: Vec<Track> = raw
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("store: dropping unreadable history entry: {}", e);
                    None
                }
            })
            .collect();
        if tracks.len() > HISTORY_LIMIT {
            tracks.drain(..tracks.len() - HISTORY_LIMIT);
        }
        tracks
    }

    pub fn save_history(&mut self, tracks: &[Track]) -> anyhow::Result<()> {
        self.set(HISTORY_KEY, &tracks)
    }

    // ── Guest identity ───────────────────────────────────────────────────────

    /// Load the guest identity, minting and persisting an id on first use.
    pub fn guest_identity(&mut self) -> GuestIdentity {
        let id = match self.get::<String>(GUEST_ID_KEY).filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => {
                let id = new_guest_id();
                if let Err(e) = self.set(GUEST_ID_KEY, &id) {
                    warn!("store: failed to persist guest id: {}", e);
                }
                id
            }
        };
        let stored_name = self
            .get::<String>(GUEST_NAME_KEY)
            .filter(|n| !n.trim().is_empty());
        GuestIdentity {
            id,
            has_custom_name: stored_name.is_some(),
            name: stored_name.unwrap_or_else(|| DEFAULT_GUEST_NAME.to_string()),
        }
    }

    /// Persist a display name.  Blank input resets to the default name.
    pub fn set_guest_name(&mut self, name: &str) -> anyhow::Result<GuestIdentity> {
        let name = name.trim();
        let name = if name.is_empty() { DEFAULT_GUEST_NAME } else { name };
        self.set(GUEST_NAME_KEY, &name)?;
        Ok(self.guest_identity())
    }

    // ── Host session ─────────────────────────────────────────────────────────

    pub fn host_authorized(&self) -> bool {
        self.get(HOST_AUTH_KEY).unwrap_or(false)
    }

    pub fn set_host_authorized(&mut self, authorized: bool) -> anyhow::Result<()> {
        self.set(HOST_AUTH_KEY, &authorized)
    }

    // ── persistence ──────────────────────────────────────────────────────────

    fn save(&self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load_entries(path: &Path) -> BTreeMap<String, serde_json::Value> {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(entries) => return entries,
                Err(e) => warn!("store: {} is corrupt, starting empty: {}", path.display(), e),
            }
        }
        BTreeMap::new()
    }
}

/// `guest_` followed by nine base-36 characters.
fn new_guest_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("guest_{}", suffix)
}
