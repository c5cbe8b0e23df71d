//! Length-prefixed, checksummed record framing.
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┐
//! │ Length (u32) │ CRC32 (u32)  │ Fact (protobuf) │
//! │ big-endian   │ big-endian   │ Length bytes    │
//! └──────────────┴──────────────┴─────────────────┘
//! ```
//!
//! A checksum or protobuf failure is confined to its own frame: the length
//! prefix still locates the next one. A short tail (crash mid-write of an
//! unsealed segment) ends iteration.

use prost::Message;

use super::{DecodeError, EncodeError, Fact};

/// Bytes preceding each record body.
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single record body. Larger lengths mean a corrupt header.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a fact into a framed record.
///
/// Bodies over [`MAX_RECORD_LEN`] are refused: the decoder would treat their
/// length prefix as corrupt and stop reading the segment there.
pub fn encode_record(fact: &Fact) -> Result<Vec<u8>, EncodeError> {
    let len = fact.encoded_len();
    if len > MAX_RECORD_LEN {
        return Err(EncodeError::TooLarge {
            len,
            max: MAX_RECORD_LEN,
        });
    }

    let body = fact.encode_to_vec();
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode the first framed record in `buf`.
///
/// Returns the decoded result and the number of bytes the frame occupied, or
/// `None` for the frame length when the header itself cannot be trusted and
/// iteration must stop.
pub fn decode_record(buf: &[u8]) -> (Result<Fact, DecodeError>, Option<usize>) {
    if buf.len() < FRAME_HEADER_LEN {
        return (
            Err(DecodeError::Truncated {
                needed: FRAME_HEADER_LEN,
                available: buf.len(),
            }),
            None,
        );
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if len > MAX_RECORD_LEN {
        return (Err(DecodeError::Oversized(len)), None);
    }

    let end = FRAME_HEADER_LEN + len;
    if buf.len() < end {
        return (
            Err(DecodeError::Truncated {
                needed: end,
                available: buf.len(),
            }),
            None,
        );
    }

    let body = &buf[FRAME_HEADER_LEN..end];
    let actual = crc32fast::hash(body);
    if actual != expected {
        return (Err(DecodeError::Checksum { expected, actual }), Some(end));
    }

    (Fact::decode(body).map_err(DecodeError::from), Some(end))
}

/// Iterates the framed records of one segment's bytes.
pub struct RecordIter<'a> {
    buf: &'a [u8],
    done: bool,
}

impl<'a> RecordIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, done: false }
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Fact, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.is_empty() {
            return None;
        }

        let (result, consumed) = decode_record(self.buf);
        match consumed {
            Some(n) => self.buf = &self.buf[n..],
            None => self.done = true,
        }
        Some(result)
    }
}
