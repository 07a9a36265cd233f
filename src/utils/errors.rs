// src/utils/errors.rs
//! Error types shared across the crate

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, BagError>;

/// Top-level error for recording, playback and broker operations
#[derive(Debug, Error)]
pub enum BagError {
    /// The trace file is malformed
    #[error("trace format error: {0}")]
    Format(#[from] FormatError),

    /// File creation, write or read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Broker unreachable or credentials rejected
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Broker refused or dropped an outbound publish
    #[error("publish failed: {0}")]
    Publish(String),

    /// `append` or `close` called on a writer that was already closed
    #[error("trace writer is closed")]
    WriterClosed,

    /// Topic contains characters outside ISO-8859-15
    #[error("topic {0:?} cannot be encoded as ISO-8859-15")]
    TopicEncoding(String),

    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BagError {
    /// True when the error came from parsing a trace file
    pub fn is_format(&self) -> bool {
        matches!(self, BagError::Format(_))
    }
}

impl From<config::ConfigError> for BagError {
    fn from(err: config::ConfigError) -> Self {
        BagError::Config(err.to_string())
    }
}

/// Corruption detected while reading or encoding a trace
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("bad magic {found:?}, expected \"MQTTv1.0\"")]
    BadMagic { found: Vec<u8> },

    #[error("file is {len} bytes, shorter than the 24-byte header")]
    TruncatedHeader { len: u64 },

    /// A length field points past the end of the file
    #[error("frame at byte {position} needs {needed} bytes but only {remaining} remain")]
    TruncatedFrame {
        position: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("frame at byte {position} has inconsistent length fields: {detail}")]
    LengthMismatch { position: usize, detail: String },

    #[error("file ended after {found} frames, header declares {expected}")]
    PrematureEof { expected: u64, found: u64 },

    #[error("frame {index} offset {offset} precedes previous offset {previous}")]
    NonMonotonicOffset {
        index: u64,
        previous: f64,
        offset: f64,
    },

    /// Offset too large to schedule
    #[error("frame {index} offset {offset} is out of range")]
    OffsetOutOfRange { index: u64, offset: f64 },

    #[error("frame of {size} bytes does not fit 32-bit length fields")]
    FrameTooLarge { size: usize },
}
