//! Shared types for jukebox surfaces: wire protocol, configuration, platform
//! paths and the per-surface local store.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod store;
