use std::path::PathBuf;

use clap::Parser;
use jukebox_proto::config::{Config, SurfaceKind};
use jukebox_sync::{Surface, SurfaceUpdate};
use tokio::sync::broadcast;

/// Headless jukebox surface: mirrors the backend and logs what changes.
#[derive(Parser, Debug)]
#[command(name = "jukebox-surface", version)]
struct Args {
    /// Surface class: host, guest or projector
    #[arg(default_value = "projector")]
    kind: SurfaceKind,

    /// Identifier for this surface's log and local store (defaults to the kind)
    surface_id: Option<String>,

    /// Read config from this file instead of the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override backend.base_url, e.g. http://jukebox.local:3000/api
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let kind = args.kind;
    let surface_id = args.surface_id.unwrap_or_else(|| kind.label().to_string());

    // ── Load config ──────────────────────────────────────────────────────────
    let loaded = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("jukebox: config unreadable ({}), using defaults", e);
        Config::default()
    });
    if let Some(url) = args.base_url {
        config.backend.base_url = url;
    }

    let data_dir = config.paths.data_dir.clone();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join(format!("{}.log", surface_id));
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("jukebox log: {}", log_path.display());
    tracing::info!("jukebox-surface starting as {} '{}'", kind.label(), surface_id);

    // ── Open surface ─────────────────────────────────────────────────────────
    let surface = Surface::open(kind, &surface_id, &config)?;
    let mut updates = surface.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            update = updates.recv() => match update {
                Ok(update) => render(&update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("render: skipped {} updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    surface.close().await;
    Ok(())
}

/// Headless rendering: log what a display would change.  Frame-rate
/// progress is too chatty for the log.
fn render(update: &SurfaceUpdate) {
    match update {
        SurfaceUpdate::Progress { .. } => {}
        SurfaceUpdate::NowPlaying { track: Some(t), .. } => {
            tracing::info!("now playing: {} - {}", t.artist, t.name);
        }
        other => match serde_json::to_string(other) {
            Ok(json) => tracing::info!("update: {}", json),
            Err(e) => tracing::warn!("update not serializable: {}", e),
        },
    }
}
