// src/trace/format.rs
//! Binary trace layout
//!
//! ```text
//! header (24 bytes)
//!   0..8    magic "MQTTv1.0"
//!   8..16   frame count        u64 LE
//!   16..24  duration (seconds) f64 LE
//!
//! frame
//!   msg_len    u32 LE   bytes that follow, timestamp included
//!   timestamp  f64 LE   seconds since the first frame
//!   topic_len  u32 LE
//!   topic      topic_len bytes, ISO-8859-15
//!   data_len   u32 LE
//!   payload    data_len bytes
//! ```

use crate::trace::latin9;
use crate::utils::errors::FormatError;
use bytes::{Buf, BufMut, Bytes};
use std::time::Duration;

pub const MAGIC: &[u8; 8] = b"MQTTv1.0";
pub const HEADER_SIZE: usize = 24;

/// Byte offset of the frame count inside the header
pub const COUNT_OFFSET: u64 = 8;

const LEN_FIELD_SIZE: usize = 4;
const TIMESTAMP_SIZE: usize = 8;

/// Smallest legal `msg_len`: timestamp plus two empty length-prefixed fields
const MIN_MESSAGE_LEN: usize = TIMESTAMP_SIZE + 2 * LEN_FIELD_SIZE;

/// Header values, final only after the writer is closed
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TraceHeader {
    pub frame_count: u64,

    /// Offset of the last frame in seconds
    pub duration: f64,
}

impl TraceHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..8].copy_from_slice(MAGIC);
        out[8..16].copy_from_slice(&self.frame_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.duration.to_le_bytes());
        out
    }

    /// Parse and validate the first 24 bytes of a trace
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            // A short file with the wrong magic is reported as bad magic
            let magic_len = bytes.len().min(MAGIC.len());
            if bytes[..magic_len] != MAGIC[..magic_len] {
                return Err(FormatError::BadMagic {
                    found: bytes[..magic_len].to_vec(),
                });
            }
            return Err(FormatError::TruncatedHeader {
                len: bytes.len() as u64,
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(FormatError::BadMagic {
                found: buf[..MAGIC.len()].to_vec(),
            });
        }
        buf.advance(MAGIC.len());

        Ok(Self {
            frame_count: buf.get_u64_le(),
            duration: buf.get_f64_le(),
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration).unwrap_or_default()
    }
}

/// One recorded message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Seconds since the first frame
    pub offset: f64,
    pub topic: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(offset: f64, topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Offset as a duration; negative or non-finite offsets clamp to zero
    pub fn offset_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.offset).unwrap_or_default()
    }
}

/// Append one encoded frame to `buf`
pub fn encode_frame(
    buf: &mut Vec<u8>,
    offset: f64,
    topic: &[u8],
    payload: &[u8],
) -> Result<(), FormatError> {
    let msg_len = MIN_MESSAGE_LEN + topic.len() + payload.len();
    let msg_len_field = u32::try_from(msg_len).map_err(|_| FormatError::FrameTooLarge {
        size: LEN_FIELD_SIZE + msg_len,
    })?;

    buf.reserve(LEN_FIELD_SIZE + msg_len);
    buf.put_u32_le(msg_len_field);
    buf.put_f64_le(offset);
    buf.put_u32_le(topic.len() as u32);
    buf.put_slice(topic);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);

    Ok(())
}

/// Decode the frame starting at `position`
///
/// Returns the frame and the number of bytes it occupies.
pub fn decode_frame(data: &[u8], position: usize) -> Result<(Frame, usize), FormatError> {
    let mut buf = &data[position..];
    let remaining = buf.len();

    if remaining < LEN_FIELD_SIZE {
        return Err(FormatError::TruncatedFrame {
            position,
            needed: LEN_FIELD_SIZE,
            remaining,
        });
    }

    let msg_len = buf.get_u32_le() as usize;
    if msg_len > buf.remaining() {
        return Err(FormatError::TruncatedFrame {
            position,
            needed: LEN_FIELD_SIZE + msg_len,
            remaining,
        });
    }
    if msg_len < MIN_MESSAGE_LEN {
        return Err(FormatError::LengthMismatch {
            position,
            detail: format!("message length {} below minimum {}", msg_len, MIN_MESSAGE_LEN),
        });
    }

    let mut body = &buf[..msg_len];
    let offset = body.get_f64_le();

    let topic_len = body.get_u32_le() as usize;
    if topic_len + LEN_FIELD_SIZE > body.remaining() {
        return Err(FormatError::LengthMismatch {
            position,
            detail: format!("topic length {} overruns message of {} bytes", topic_len, msg_len),
        });
    }
    let topic = latin9::decode(&body[..topic_len]);
    body.advance(topic_len);

    let data_len = body.get_u32_le() as usize;
    if data_len != body.remaining() {
        return Err(FormatError::LengthMismatch {
            position,
            detail: format!(
                "payload length {} but {} bytes left in message",
                data_len,
                body.remaining()
            ),
        });
    }

    let frame = Frame {
        offset,
        topic,
        payload: Bytes::copy_from_slice(body),
    };

    Ok((frame, LEN_FIELD_SIZE + msg_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = TraceHeader {
            frame_count: 3,
            duration: 1.2,
        };
        let bytes = header.encode();

        assert_eq!(&bytes[..8], b"MQTTv1.0");
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 3);
        assert_eq!(f64::from_le_bytes(bytes[16..24].try_into().unwrap()), 1.2);
        assert_eq!(TraceHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut bytes = TraceHeader::default().encode();
        bytes[0] = b'X';
        assert!(matches!(
            TraceHeader::decode(&bytes),
            Err(FormatError::BadMagic { .. })
        ));
        assert!(matches!(
            TraceHeader::decode(b"JUNK"),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_header_truncated() {
        let bytes = TraceHeader::default().encode();
        assert_eq!(
            TraceHeader::decode(&bytes[..12]),
            Err(FormatError::TruncatedHeader { len: 12 })
        );
    }

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, 0.5, b"a/2", b"world").unwrap();

        // msg_len covers timestamp, both length fields, topic and payload
        let msg_len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(msg_len, 8 + 4 + 3 + 4 + 5);
        assert_eq!(buf.len(), 4 + msg_len);
        assert_eq!(f64::from_le_bytes(buf[4..12].try_into().unwrap()), 0.5);
        assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 3);
        assert_eq!(&buf[16..19], b"a/2");
        assert_eq!(u32::from_le_bytes(buf[19..23].try_into().unwrap()), 5);
        assert_eq!(&buf[23..], b"world");

        let (frame, used) = decode_frame(&buf, 0).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(frame, Frame::new(0.5, "a/2", &b"world"[..]));
    }

    #[test]
    fn test_empty_topic_and_payload() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, 0.0, b"", b"").unwrap();
        let (frame, used) = decode_frame(&buf, 0).unwrap();
        assert_eq!(used, 20);
        assert!(frame.topic.is_empty());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, 0.0, b"t", b"payload").unwrap();

        let short = &buf[..buf.len() - 1];
        assert!(matches!(
            decode_frame(short, 0),
            Err(FormatError::TruncatedFrame { .. })
        ));
        assert!(matches!(
            decode_frame(&buf[..2], 0),
            Err(FormatError::TruncatedFrame { needed: 4, .. })
        ));
    }

    #[test]
    fn test_decode_inconsistent_lengths() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, 0.0, b"topic", b"data").unwrap();

        // Topic length pointing past the message
        let mut bad_topic = buf.clone();
        bad_topic[12..16].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode_frame(&bad_topic, 0),
            Err(FormatError::LengthMismatch { .. })
        ));

        // Payload length disagreeing with msg_len
        let mut bad_data = buf.clone();
        let data_len_at = 4 + 8 + 4 + 5;
        bad_data[data_len_at..data_len_at + 4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            decode_frame(&bad_data, 0),
            Err(FormatError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_offset_duration_clamps() {
        assert_eq!(Frame::new(-1.0, "t", Bytes::new()).offset_duration(), Duration::ZERO);
        assert_eq!(
            Frame::new(1.5, "t", Bytes::new()).offset_duration(),
            Duration::from_millis(1500)
        );
    }
}
