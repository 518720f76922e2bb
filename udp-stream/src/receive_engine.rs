//! Receive-side reassembly and cumulative-ACK state machine.
//!
//! [`ReceiveEngine`] implements the receiving half of the stream:
//!
//! - Segments may arrive in any order; those beyond a gap are **buffered**
//!   in an ordered map until their predecessors show up.
//! - Contiguous data is moved to the application buffer exactly once, in
//!   stream order; the application never sees bytes past a gap.
//! - Segments entirely behind `received_bytes` are stale duplicates and are
//!   discarded.
//! - [`ReceiveEngine::ack_number`] is the cumulative ACK to advertise: the
//!   offset of the first byte not yet received in order.
//!
//! This module only manages state; sending the ACK that every data arrival
//! calls for is the caller's job (see [`Arrival`]).

use std::collections::{BTreeMap, VecDeque};

// ---------------------------------------------------------------------------
// Arrival
// ---------------------------------------------------------------------------

/// What an inbound segment did to the receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// No payload (pure ACK); nothing to acknowledge.
    Empty,
    /// `received_bytes` advanced; `delivered` new bytes are now readable.
    Advanced { delivered: usize },
    /// Every byte was already received; only a duplicate ACK is due.
    Duplicate,
    /// Held back behind a gap.
    Buffered,
}

impl Arrival {
    /// `true` when the caller should answer with an ACK.
    pub fn wants_ack(&self) -> bool {
        !matches!(self, Arrival::Empty)
    }
}

// ---------------------------------------------------------------------------
// ReceiveEngine
// ---------------------------------------------------------------------------

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct ReceiveEngine {
    /// Next expected offset; also the cumulative ACK value.
    received_bytes: u64,
    /// Out-of-order payloads keyed by sequence number.
    window: BTreeMap<u64, Vec<u8>>,
    /// In-order bytes not yet read by the application.
    delivered: VecDeque<u8>,
}

impl ReceiveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative ACK number to place in the next outbound segment.
    pub fn ack_number(&self) -> u64 {
        self.received_bytes
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Number of segments parked behind a gap.
    pub fn buffered_segments(&self) -> usize {
        self.window.len()
    }

    /// Bytes ready for [`read`](Self::read).
    pub fn available(&self) -> usize {
        self.delivered.len()
    }

    /// Process the payload of an inbound segment.
    ///
    /// The segment is parked in the receive window, which is then drained
    /// from its lowest offset: stale entries are dropped, the entry at
    /// `received_bytes` is delivered (possibly unblocking its successors),
    /// and the first entry past a gap stops the drain.
    pub fn on_segment(&mut self, seq: u64, payload: &[u8]) -> Arrival {
        if payload.is_empty() {
            return Arrival::Empty;
        }
        if seq < self.received_bytes {
            return Arrival::Duplicate;
        }
        self.window.insert(seq, payload.to_vec());

        let before = self.received_bytes;
        while let Some(entry) = self.window.first_entry() {
            let seq = *entry.key();
            if seq > self.received_bytes {
                break;
            }
            let data = entry.remove();
            if seq == self.received_bytes {
                self.received_bytes += data.len() as u64;
                self.delivered.extend(data);
            }
            // seq < received_bytes: superseded by data delivered this drain.
        }

        let delivered = (self.received_bytes - before) as usize;
        if delivered > 0 {
            log::trace!(
                "delivered {} bytes, received_bytes={} buffered={}",
                delivered,
                self.received_bytes,
                self.window.len()
            );
            Arrival::Advanced { delivered }
        } else {
            Arrival::Buffered
        }
    }

    /// Move up to `n` in-order bytes out of the application buffer.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.delivered.len());
        self.delivered.drain(..n).collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
