// src/trace/writer.rs
//! Trace writer with a header patched in place on close
//!
//! The frame count and duration are only known once recording stops, but
//! they live in the first 24 bytes of the file. The writer reserves that
//! space with a placeholder header, streams frames after it, and seeks back
//! on [`TraceWriter::close`] to fill in the final values.

use crate::trace::format::{encode_frame, TraceHeader, COUNT_OFFSET, HEADER_SIZE};
use crate::trace::latin9;
use crate::utils::errors::{BagError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// State of an open trace
struct OpenTrace {
    file: BufWriter<File>,

    /// Capture time of the first frame
    anchor: Option<Instant>,

    frame_count: u64,
    last_offset: f64,

    /// File length up to the end of the last complete frame
    committed_len: u64,

    /// A failed write may have left a partial frame that is not cut off yet
    poisoned: bool,

    /// Reused encode buffer
    scratch: Vec<u8>,
}

impl OpenTrace {
    /// Cut the file back to the last complete frame
    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().set_len(self.committed_len)?;
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        self.poisoned = false;
        Ok(())
    }
}

/// Single-writer trace file
///
/// `append` and `close` take `&self`; calls are serialized by an internal
/// mutex so concurrent deliveries never interleave partial frames.
pub struct TraceWriter {
    path: PathBuf,
    state: Mutex<Option<OpenTrace>>,
}

impl TraceWriter {
    /// Create (or truncate) `path` and write the placeholder header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut file = BufWriter::new(file);
        file.write_all(&TraceHeader::default().encode())?;

        debug!("Created trace {} with placeholder header", path.display());

        Ok(Self {
            path,
            state: Mutex::new(Some(OpenTrace {
                file,
                anchor: None,
                frame_count: 0,
                last_offset: 0.0,
                committed_len: HEADER_SIZE as u64,
                poisoned: false,
                scratch: Vec::new(),
            })),
        })
    }

    /// Append one frame captured at `captured_at`
    ///
    /// The first frame anchors offset 0.0. Returns the offset written. A
    /// capture time earlier than the previous frame's is clamped so offsets
    /// never decrease.
    pub fn append(&self, topic: &str, payload: &[u8], captured_at: Instant) -> Result<f64> {
        let mut guard = self.state.lock();
        let trace = guard.as_mut().ok_or(BagError::WriterClosed)?;

        let topic_bytes =
            latin9::encode(topic).ok_or_else(|| BagError::TopicEncoding(topic.to_string()))?;

        let anchor = *trace.anchor.get_or_insert(captured_at);
        let mut offset = captured_at.saturating_duration_since(anchor).as_secs_f64();
        if offset < trace.last_offset {
            debug!(
                "Capture time for {} is {:.6}s behind the previous frame, clamping",
                topic,
                trace.last_offset - offset
            );
            offset = trace.last_offset;
        }

        if trace.poisoned {
            trace.rollback()?;
        }

        trace.scratch.clear();
        encode_frame(&mut trace.scratch, offset, &topic_bytes, payload)?;
        if let Err(e) = trace.file.write_all(&trace.scratch) {
            trace.poisoned = true;
            if let Err(rollback_err) = trace.rollback() {
                warn!(
                    "Could not discard partial frame in {}: {}",
                    self.path.display(),
                    rollback_err
                );
            }
            return Err(e.into());
        }

        // Only counted once the bytes are handed to the file
        trace.committed_len += trace.scratch.len() as u64;
        trace.frame_count += 1;
        trace.last_offset = offset;

        Ok(offset)
    }

    /// Flush frames, patch the header and close the file
    ///
    /// Returns the final header. Fails with [`BagError::WriterClosed`] if
    /// already closed.
    pub fn close(&self) -> Result<TraceHeader> {
        let trace = self.state.lock().take().ok_or(BagError::WriterClosed)?;
        let header = TraceHeader {
            frame_count: trace.frame_count,
            duration: trace.last_offset,
        };

        let committed_len = trace.committed_len;
        let mut file = trace.file.into_inner().map_err(|e| BagError::Io(e.into_error()))?;
        file.flush()?;

        // Drop anything a failed append left behind the last complete frame
        file.set_len(committed_len)?;

        let encoded = header.encode();
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&encoded[COUNT_OFFSET as usize..HEADER_SIZE])?;
        file.flush()?;
        file.sync_all()?;

        info!(
            "Closed trace {}: {} frames, {:.3}s",
            self.path.display(),
            header.frame_count,
            header.duration
        );

        Ok(header)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Frames appended so far
    pub fn frame_count(&self) -> u64 {
        self.state.lock().as_ref().map_or(0, |t| t.frame_count)
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!("Failed to finalize trace {} on drop: {}", self.path.display(), e);
        }
    }
}
