//! Wire-format definitions for stream segments.
//!
//! Every datagram exchanged between peers carries exactly one [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (two counters, then payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                   Sequence Number (64 bits)                   +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                Acknowledgment Number (64 bits)                +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 16 bytes.  There is no checksum, no
//! flags field and no length field: the payload is whatever follows the
//! header in the datagram.  An empty payload is a pure ACK.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 16;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 8;

/// One protocol message: stream offsets plus the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the first payload byte in the author's send stream.
    pub seq: u64,
    /// Next byte offset the author expects from its peer (cumulative ACK).
    pub ack: u64,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(seq: u64, ack: u64, payload: Vec<u8>) -> Self {
        Self { seq, ack, payload }
    }

    /// A payload-less segment that only advertises `ack`.
    pub fn ack_only(seq: u64, ack: u64) -> Self {
        Self::new(seq, ack, Vec::new())
    }

    /// Stream offset just past the last payload byte.
    ///
    /// The peer confirms this segment once its cumulative ACK reaches `end()`.
    pub fn end(&self) -> u64 {
        self.seq.saturating_add(self.payload.len() as u64)
    }

    pub fn is_ack_only(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Everything after the 16-byte header is payload, including nothing at
    /// all.  Returns [`SegmentError::BufferTooShort`] if the header itself is
    /// truncated.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort { len: buf.len() });
        }

        let seq = read_u64(&buf[OFF_SEQ..OFF_SEQ + 8]);
        let ack = read_u64(&buf[OFF_ACK..OFF_ACK + 8]);

        Ok(Self {
            seq,
            ack,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_be_bytes(raw)
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("datagram of {len} bytes is shorter than the 16-byte header")]
    BufferTooShort { len: usize },
}
