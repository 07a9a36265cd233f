// src/replay/mod.rs
//! Trace playback
//!
//! - **Player**: drift-free, cancellable, optionally looping playback
//! - **Publisher**: the outbound seam the player publishes through
//! - **Info**: header-only trace summary

pub mod info;
pub mod player;
pub mod publisher;

pub use info::{format_duration, TraceInfo};
pub use player::{PlaybackStats, Player, PlayerSettings, PlayerState};
pub use publisher::Publisher;
