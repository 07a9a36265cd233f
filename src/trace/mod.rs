// src/trace/mod.rs
//! Binary trace codec
//!
//! - **Format**: header and frame layout, encode/decode helpers
//! - **Writer**: streams frames and patches the header on close
//! - **Reader**: validates and iterates frames from a memory-mapped file
//! - **Latin-9**: topic text encoding used on disk

pub mod format;
pub mod latin9;
pub mod reader;
pub mod writer;

pub use format::{Frame, TraceHeader, HEADER_SIZE, MAGIC};
pub use reader::TraceReader;
pub use writer::TraceWriter;
