//! Per-connection counters.

use std::fmt;

/// Snapshot of what a [`crate::stream::StreamConnection`] has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Data segments sent for the first time.
    pub segments_sent: u64,
    /// Data segments sent again after their ACK timed out.
    pub retransmissions: u64,
    /// Pure ACK segments sent.
    pub acks_sent: u64,
    /// Datagrams decoded into segments.
    pub segments_received: u64,
    /// Data segments that carried only bytes already received.
    pub duplicates_received: u64,
    /// Data segments parked behind a gap.
    pub out_of_order_received: u64,
    /// Datagrams too short to hold a header.
    pub malformed_datagrams: u64,
    /// `send` calls that stopped because the peer went quiet.
    pub give_ups: u64,
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} retx={} acks={} recv={} dup={} ooo={} malformed={} give_ups={}",
            self.segments_sent,
            self.retransmissions,
            self.acks_sent,
            self.segments_received,
            self.duplicates_received,
            self.out_of_order_received,
            self.malformed_datagrams,
            self.give_ups
        )
    }
}
