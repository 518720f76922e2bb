//! Sliding-window send-side state machine.
//!
//! [`SendEngine`] owns the outbound byte counters and the window of
//! in-flight segments.  Unlike Go-Back-N, only the **oldest** unconfirmed
//! segment is ever retransmitted, and only once it has aged past the ACK
//! timeout.
//!
//! # Protocol contract
//!
//! - Sequence numbers are absolute byte offsets (`u64`) and never wrap.
//! - At most `window_size` bytes may be sent but unconfirmed at once.
//! - ACKs are **cumulative**: `ack = K` means the peer holds every byte
//!   before offset `K`.  A segment is retired once its end offset is `≤ K`.
//! - `sent_bytes` only advances for a segment carrying exactly the next
//!   offset; retransmissions leave it untouched.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  The caller reports how many payload bytes the transport
//! accepted via [`SendEngine::record_sent`].
//!
//! ```text
//!  confirmed_bytes         sent_bytes     confirmed_bytes + window_size
//!        │                     │                      │
//!  ──────┼─────────────────────┼──────────────────────┼──────▶ byte offset
//!        │ <── in flight ────▶ │ <──── sendable ────▶ │
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::{ConfigError, StreamConfig};
use crate::segment::Segment;
use crate::stream::StreamError;

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A transmitted segment still awaiting cumulative confirmation.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub segment: Segment,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

impl InFlight {
    fn is_expired(&self, now: Instant, ack_timeout: Duration) -> bool {
        now.saturating_duration_since(self.sent_at) > ack_timeout
    }
}

// ---------------------------------------------------------------------------
// SendEngine
// ---------------------------------------------------------------------------

/// Send-side state for one connection.
#[derive(Debug)]
pub struct SendEngine {
    /// Offset the next new segment will carry.
    sent_bytes: u64,
    /// Highest cumulative ACK received from the peer.
    confirmed_bytes: u64,
    mss: usize,
    window_size: usize,
    ack_timeout: Duration,
    /// In-flight segments keyed by sequence number.
    window: BTreeMap<u64, InFlight>,
}

impl SendEngine {
    /// Fresh engine at offset zero, sized from `config`.
    pub fn new(config: &StreamConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sent_bytes: 0,
            confirmed_bytes: 0,
            mss: config.mss,
            window_size: config.window_size,
            ack_timeout: config.ack_timeout,
            window: BTreeMap::new(),
        })
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    pub fn confirmed_bytes(&self) -> u64 {
        self.confirmed_bytes
    }

    /// Bytes sent but not yet covered by a cumulative ACK.
    pub fn in_flight(&self) -> u64 {
        self.sent_bytes - self.confirmed_bytes
    }

    /// `true` while any sent byte is still unconfirmed.
    pub fn has_unconfirmed(&self) -> bool {
        self.confirmed_bytes < self.sent_bytes
    }

    /// Number of segments held for possible retransmission.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// `true` when the window is full and new data must wait for ACKs.
    pub fn is_window_locked(&self) -> bool {
        self.in_flight() >= self.window_size as u64
    }

    /// Build the next data segment from the head of `unsent`.
    ///
    /// The payload is capped at the MSS and at the room left in the window,
    /// so recording it can never push in-flight bytes past `window_size`.
    /// `ack` is the cumulative ACK to piggyback.
    pub fn carve(&self, unsent: &[u8], ack: u64) -> Segment {
        let room = (self.window_size as u64).saturating_sub(self.in_flight()) as usize;
        let len = unsent.len().min(self.mss).min(room);
        Segment::new(self.sent_bytes, ack, unsent[..len].to_vec())
    }

    /// Pure ACK advertising `ack` at the current send offset.
    pub fn ack_segment(&self, ack: u64) -> Segment {
        Segment::ack_only(self.sent_bytes, ack)
    }

    /// Book-keep a segment the transport has just accepted.
    ///
    /// `accepted` is the number of payload bytes that actually went out
    /// (the transport may send short).  A new segment is truncated to that
    /// length before being stored.  Returns the number of new stream bytes,
    /// which is zero for retransmissions and pure ACKs.
    ///
    /// A segment whose `seq` lies beyond `sent_bytes` means the caller has
    /// lost track of the stream and yields [`StreamError::SequenceViolation`].
    pub fn record_sent(
        &mut self,
        mut segment: Segment,
        accepted: usize,
        now: Instant,
    ) -> Result<usize, StreamError> {
        if segment.seq > self.sent_bytes {
            return Err(StreamError::SequenceViolation {
                seq: segment.seq,
                sent: self.sent_bytes,
            });
        }

        // A short retransmission keeps the full payload; those bytes were
        // already counted and must stay available for the next attempt.
        let fresh = if segment.seq == self.sent_bytes {
            segment.payload.truncate(accepted);
            segment.payload.len()
        } else {
            0
        };
        self.sent_bytes += fresh as u64;

        if segment.payload.is_empty() {
            return Ok(fresh);
        }

        // Retransmissions keep their tx_count history.
        let tx_count = self
            .window
            .get(&segment.seq)
            .map_or(1, |prev| prev.tx_count + 1);
        self.window.insert(
            segment.seq,
            InFlight {
                segment,
                tx_count,
                sent_at: now,
            },
        );
        Ok(fresh)
    }

    /// Process a cumulative ACK.
    ///
    /// Raises `confirmed_bytes` when `ack` is new, then retires window
    /// entries from the lowest offset until the first one that is not fully
    /// covered.  Returns the number of retired entries.  Stale ACKs and ACKs
    /// for bytes never sent are ignored.
    pub fn on_ack(&mut self, ack: u64) -> usize {
        if ack <= self.confirmed_bytes {
            return 0;
        }
        if ack > self.sent_bytes {
            log::warn!(
                "ignoring ack {} beyond sent_bytes {}",
                ack,
                self.sent_bytes
            );
            return 0;
        }
        self.confirmed_bytes = ack;

        let mut retired = 0usize;
        while let Some(entry) = self.window.first_entry() {
            if entry.get().segment.end() > self.confirmed_bytes {
                break;
            }
            entry.remove();
            retired += 1;
        }
        retired
    }

    /// Hand back the oldest in-flight segment if it needs resending.
    ///
    /// Only the lowest-offset entry is examined.  It is returned when it has
    /// been unconfirmed for longer than the ACK timeout, or unconditionally
    /// when `force` is set; otherwise the window is left untouched.  The
    /// caller transmits the segment and passes it back through
    /// [`record_sent`](Self::record_sent), which refreshes its timestamp.
    pub fn retransmit_oldest(&self, now: Instant, force: bool) -> Option<Segment> {
        let (_, oldest) = self.window.first_key_value()?;
        if force || oldest.is_expired(now, self.ack_timeout) {
            log::trace!(
                "seq={} due for transmission #{}",
                oldest.segment.seq,
                oldest.tx_count + 1
            );
            Some(oldest.segment.clone())
        } else {
            None
        }
    }

    /// Iterate over in-flight entries from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &InFlight> {
        self.window.values()
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Counts consecutive unanswered polls to detect a vanished peer.
#[derive(Debug, Clone)]
pub struct Liveness {
    lag: u32,
    crit_lag: u32,
}

impl Liveness {
    pub fn new(crit_lag: u32) -> Self {
        Self { lag: 0, crit_lag }
    }

    pub fn lag(&self) -> u32 {
        self.lag
    }

    /// A poll that expected a response timed out.
    pub fn on_silence(&mut self) {
        self.lag = self.lag.saturating_add(1);
    }

    /// Any datagram arrived from the peer.
    pub fn on_contact(&mut self) {
        self.lag = 0;
    }

    pub fn is_unresponsive(&self) -> bool {
        self.lag >= self.crit_lag
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
