// src/replay/info.rs
//! Summary of a trace built from its header alone

use crate::trace::{TraceHeader, TraceReader, HEADER_SIZE};
use std::fmt;
use std::path::PathBuf;

/// What `--info` prints
#[derive(Debug, Clone, PartialEq)]
pub struct TraceInfo {
    pub path: PathBuf,
    pub header: TraceHeader,
    pub file_len: usize,
}

impl TraceInfo {
    pub fn from_reader(reader: &TraceReader) -> Self {
        Self {
            path: reader.path().to_path_buf(),
            header: reader.header(),
            file_len: reader.file_len(),
        }
    }

    /// Header says zero frames but frame bytes follow it
    ///
    /// This is what a recording looks like when the process died before the
    /// header was finalized.
    pub fn looks_unfinalized(&self) -> bool {
        self.header.frame_count == 0 && self.file_len > HEADER_SIZE
    }
}

impl fmt::Display for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File: {}", self.path.display())?;
        writeln!(f, "Size: {} bytes", self.file_len)?;
        writeln!(f, "Total number of messages in file: {}", self.header.frame_count)?;
        write!(
            f,
            "Total duration of the recording: {}",
            format_duration(self.header.duration)
        )?;
        if self.looks_unfinalized() {
            write!(
                f,
                "\nWarning: header reports no messages but frame data follows; \
                 the recording was not closed cleanly"
            )?;
        }
        Ok(())
    }
}

/// Format seconds as `H:MM:SS`, with `.ffffff` when there is a fraction
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00:00".to_string();
    }

    let total_micros = (seconds * 1_000_000.0).round() as u64;
    let micros = total_micros % 1_000_000;
    let total_secs = total_micros / 1_000_000;
    let (hours, mins, secs) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);

    if micros == 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}:{:02}.{:06}", hours, mins, secs, micros)
    }
}
