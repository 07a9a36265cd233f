// src/lib.rs
//! MQTT bag library
//!
//! Records MQTT traffic into a compact binary trace and replays it with the
//! original inter-message timing.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **trace**: on-disk format, writer and reader
//! - **filter**: allow/deny topic filters with MQTT wildcards
//! - **recording**: event channel and recorder
//! - **replay**: player, publisher seam and trace summary
//! - **broker**: MQTT client used for recording and playback
//! - **cli**: command-line surface of the `mqtt-bag` binary
//! - **observability**: logging and metrics
//! - **utils**: errors and configuration

// Public module exports
pub mod broker;
pub mod cli;
pub mod filter;
pub mod observability;
pub mod recording;
pub mod replay;
pub mod trace;
pub mod utils;

// Re-export commonly used types
pub use filter::TopicFilter;
pub use recording::{Recorder, RecorderStats};
pub use replay::{Player, PlayerSettings, PlayerState, Publisher};
pub use trace::{Frame, TraceHeader, TraceReader, TraceWriter};
pub use utils::config::BagConfig;
pub use utils::errors::{BagError, FormatError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
