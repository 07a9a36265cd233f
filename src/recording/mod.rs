// src/recording/mod.rs
//! Live capture into a trace file
//!
//! - **Event Queue**: bounded channel fed by the broker client's delivery loop
//! - **Recorder**: filters events and drives the trace writer
//!
//! # Architecture
//!
//! ```text
//! Broker delivery loop → EventSender → bounded channel → EventReceiver
//!                                                             ↓
//!                                                  Recorder (TopicFilter)
//!                                                             ↓
//!                                                  TraceWriter::append
//!                                                             ↓
//!                                         close(): header patched in place
//! ```

pub mod event_queue;
pub mod recorder;

// Re-export commonly used types
pub use event_queue::{event_channel, EventReceiver, EventSender, MessageEvent, QueueStats};
pub use recorder::{Recorder, RecorderStats};
