//! `udp-stream`: a reliable, ordered, flow-controlled byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   segments   ┌───────────────┐
//!  │ SendEngine │─────────────▶│ ReceiveEngine │  (on the peer)
//!  └─────┬──────┘              └───────┬───────┘
//!        │                             │
//!        │       cumulative ACKs       │
//!        │◀────────────────────────────┘
//!        │
//!  ┌─────▼─────────────────────────────────┐
//!  │           StreamConnection            │
//!  │  (owns both engines + the transport)  │
//!  └─────┬─────────────────────────────────┘
//!        │ raw datagrams
//!  ┌─────▼─────┐
//!  │ Transport │  (UDP socket, or the in-memory simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]         wire format (serialise / deserialise)
//! - [`send_engine`]     outbound window, counters, retransmission, liveness
//! - [`receive_engine`]  reassembly window and cumulative ACK number
//! - [`stream`]          `send` / `recv` orchestration around transport polls
//! - [`transport`]       datagram transport contract and UDP implementation
//! - [`simulator`]       lossy/reordering in-memory link for testing
//! - [`config`]          construction-time tunables
//! - [`stats`]           per-connection counters

pub mod config;
pub mod receive_engine;
pub mod segment;
pub mod send_engine;
pub mod simulator;
pub mod stats;
pub mod stream;
pub mod transport;

pub use config::{ConfigError, StreamConfig};
pub use segment::{Segment, SegmentError, HEADER_LEN};
pub use stats::StreamStats;
pub use stream::{StreamConnection, StreamError};
pub use transport::{Transport, TransportError, UdpTransport};
