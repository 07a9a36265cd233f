// src/trace/reader.rs
//! Memory-mapped trace reader
//!
//! The whole file is mapped read-only, so every length field can be checked
//! against the real file size before anything is copied, and
//! [`TraceReader::restart`] is a cursor reset.

use crate::trace::format::{decode_frame, Frame, TraceHeader, HEADER_SIZE};
use crate::utils::errors::{FormatError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Sequential reader over a trace file
pub struct TraceReader {
    path: PathBuf,
    mmap: Mmap,
    header: TraceHeader,

    /// Byte position of the next frame
    position: usize,

    frames_read: u64,
    last_offset: f64,

    /// Set after an error so the iterator stops
    failed: bool,
}

impl TraceReader {
    /// Open a trace and validate its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            let bytes = std::fs::read(&path)?;
            let err = TraceHeader::decode(&bytes)
                .err()
                .unwrap_or(FormatError::TruncatedHeader { len });
            return Err(err.into());
        }

        // SAFETY: the map is read-only and traces are owned by a single
        // process while open.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = TraceHeader::decode(&mmap)?;

        debug!(
            "Opened trace {}: {} frames, {:.3}s, {} bytes",
            path.display(),
            header.frame_count,
            header.duration,
            mmap.len()
        );

        Ok(Self {
            path,
            mmap,
            header,
            position: HEADER_SIZE,
            frames_read: 0,
            last_offset: 0.0,
            failed: false,
        })
    }

    /// Header values, without touching the frames
    pub fn header(&self) -> TraceHeader {
        self.header
    }

    /// Read the next frame, or `None` at the end of the file
    ///
    /// Fails if a length field runs past the end of the file, if offsets go
    /// backwards or do not fit a `Duration`, or if the file ends before the
    /// header's frame count.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let result = self.read_frame();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.mmap.len() {
            if self.frames_read < self.header.frame_count {
                return Err(FormatError::PrematureEof {
                    expected: self.header.frame_count,
                    found: self.frames_read,
                }
                .into());
            }
            return Ok(None);
        }

        let (frame, used) = decode_frame(&self.mmap, self.position)?;

        // Also rejects NaN
        if !(frame.offset >= self.last_offset) {
            return Err(FormatError::NonMonotonicOffset {
                index: self.frames_read,
                previous: self.last_offset,
                offset: frame.offset,
            }
            .into());
        }

        if Duration::try_from_secs_f64(frame.offset).is_err() {
            return Err(FormatError::OffsetOutOfRange {
                index: self.frames_read,
                offset: frame.offset,
            }
            .into());
        }

        self.position += used;
        self.frames_read += 1;
        self.last_offset = frame.offset;

        Ok(Some(frame))
    }

    /// Rewind to the first frame without re-reading the header
    pub fn restart(&mut self) {
        self.position = HEADER_SIZE;
        self.frames_read = 0;
        self.last_offset = 0.0;
        self.failed = false;
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the trace file in bytes
    pub fn file_len(&self) -> usize {
        self.mmap.len()
    }
}

impl Iterator for TraceReader {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.next_frame().transpose()
    }
}
