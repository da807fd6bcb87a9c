use std::path::{Path, PathBuf};

/// Default backend API base for a jukebox running on the same machine.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:3001/api";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/jukebox/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("jukebox")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jukebox")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("jukebox")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jukebox")
    }
}

/// Directory holding one surface's local store.  Each surface id gets its
/// own directory so two surfaces on one machine never share history.
pub fn surface_dir(data_dir: &Path, surface_id: &str) -> PathBuf {
    let safe: String = surface_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "default".to_string() } else { safe };
    data_dir.join("surfaces").join(safe)
}
