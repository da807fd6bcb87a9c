//! Live-state mirror for jukebox surfaces.
//!
//! A surface (host console, guest phone, projector) keeps a local copy of
//! the backend's playback state by merging the `/events` push stream with a
//! periodic pull, and derives the time-dependent parts of the picture
//! locally: progress, the active lyric line, and short-lived reactions.

pub mod api;
pub mod channel;
pub mod clock;
pub mod core;
pub mod error;
pub mod lyrics;
pub mod poller;
pub mod reactions;
pub mod stability;
pub mod state;
pub mod surface;
pub mod tracker;

pub use crate::core::{SurfaceUpdate, SyncEvent};
pub use error::{SyncError, SyncResult};
pub use state::{LocalEdit, SurfaceView};
pub use surface::Surface;
