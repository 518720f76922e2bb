//! Reliable byte stream: the send/receive engines driven around transport polls.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(data) / recv(n)
//!      ▼
//!  StreamConnection
//!    ├── SendEngine    (sent/confirmed counters, in-flight window)
//!    ├── ReceiveEngine (reassembly window, delivered bytes)
//!    └── Transport     (one datagram per segment, polled with a timeout)
//! ```
//!
//! There is no background task and no timer: the caller's `send` or `recv`
//! drives both directions.  Every poll that yields a segment feeds its
//! payload to the [`ReceiveEngine`] and its ACK to the [`SendEngine`], so
//! data from the peer is reassembled (and acknowledged) even while the local
//! side is only sending, and vice versa.  Retransmission is checked once per
//! `send` round, so its latency follows the call cadence.
//!
//! ```ignore
//! let transport = UdpTransport::bind(local, remote).await?;
//! let mut conn = StreamConnection::new(transport, StreamConfig::default())?;
//! conn.send(b"hello").await?;
//! let reply = conn.recv(5).await?;
//! conn.close();
//! ```
//!
//! No handshake opens or closes the stream.  Both ends start at offset zero
//! and [`StreamConnection::close`] just releases the transport.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{ConfigError, StreamConfig};
use crate::receive_engine::{Arrival, ReceiveEngine};
use crate::segment::{Segment, HEADER_LEN};
use crate::send_engine::{Liveness, SendEngine};
use crate::stats::StreamStats;
use crate::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal stream failures.
///
/// A silent peer is not an error: `send` reports it through its return value.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The transport refused to send; never retried.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// A segment was recorded past the send counter.
    #[error("segment seq {seq} is beyond sent_bytes {sent}")]
    SequenceViolation { seq: u64, sent: u64 },
    #[error("invalid stream configuration: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// StreamConnection
// ---------------------------------------------------------------------------

/// One end of a reliable, ordered byte stream over a datagram [`Transport`].
#[derive(Debug)]
pub struct StreamConnection<T: Transport> {
    transport: T,
    config: StreamConfig,
    sender: SendEngine,
    receiver: ReceiveEngine,
    stats: StreamStats,
}

impl<T: Transport> StreamConnection<T> {
    /// Wrap `transport` in a fresh stream at offset zero in both directions.
    pub fn new(transport: T, config: StreamConfig) -> Result<Self, StreamError> {
        let sender = SendEngine::new(&config)?;
        Ok(Self {
            transport,
            config,
            sender,
            receiver: ReceiveEngine::new(),
            stats: StreamStats::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sender.sent_bytes()
    }

    pub fn confirmed_bytes(&self) -> u64 {
        self.sender.confirmed_bytes()
    }

    pub fn received_bytes(&self) -> u64 {
        self.receiver.received_bytes()
    }

    // -----------------------------------------------------------------------
    // Application API
    // -----------------------------------------------------------------------

    /// Stream `data` to the peer and wait until it is confirmed.
    ///
    /// Each round carves one segment when the window allows, then polls for
    /// ACKs and retransmits the oldest segment if it has expired.  Polls made
    /// while waiting on ACKs count towards the liveness lag; once
    /// `ack_crit_lag` of them go unanswered in a row the peer is presumed
    /// gone and the call returns early.
    ///
    /// Returns the number of bytes accepted into the stream.  On a normal
    /// return that is `data.len()` and every byte is confirmed; after a
    /// give-up it may be less, and the tail may be unconfirmed.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let mut liveness = Liveness::new(self.config.ack_crit_lag);
        let mut offset = 0usize;

        while (offset < data.len() || self.sender.has_unconfirmed())
            && !liveness.is_unresponsive()
        {
            if !self.sender.is_window_locked() && offset < data.len() {
                offset += self.submit(&data[offset..]).await?;
            }

            if self.sender.is_window_locked() || offset == data.len() {
                if self.poll(self.config.ack_timeout).await? {
                    liveness.on_contact();
                } else {
                    liveness.on_silence();
                    log::trace!("no answer from peer, lag={}", liveness.lag());
                }
            } else {
                self.poll(Duration::ZERO).await?;
            }

            self.retransmit_oldest(false).await?;
        }

        if liveness.is_unresponsive() {
            self.stats.give_ups += 1;
            log::warn!(
                "peer unresponsive after {} silent rounds; accepted {}/{} bytes, confirmed {}/{}",
                liveness.lag(),
                offset,
                data.len(),
                self.sender.confirmed_bytes(),
                self.sender.sent_bytes()
            );
        } else {
            log::debug!(
                "all {} bytes confirmed ({} total)",
                offset,
                self.sender.confirmed_bytes()
            );
        }
        Ok(offset)
    }

    /// Read exactly `n` bytes from the stream.
    ///
    /// Already-delivered bytes are used first; after that the transport is
    /// polled with `read_timeout` until enough contiguous data has arrived.
    /// There is no overall deadline: wrap the call in
    /// `tokio::time::timeout` if the peer may never send.
    pub async fn recv(&mut self, n: usize) -> Result<Vec<u8>, StreamError> {
        let mut data = self.receiver.read(n);
        while data.len() < n {
            self.poll(self.config.read_timeout).await?;
            data.extend(self.receiver.read(n - data.len()));
        }
        log::debug!(
            "read {} bytes, received_bytes={}",
            n,
            self.receiver.received_bytes()
        );
        Ok(data)
    }

    /// Keep answering the peer until it has been quiet for `quiet`.
    ///
    /// A receiver that already holds everything it wanted can still owe the
    /// peer an ACK (the last one may have been lost); lingering lets the
    /// peer's retransmission be acknowledged.  Nothing is sent unprompted.
    pub async fn linger(&mut self, quiet: Duration) -> Result<(), StreamError> {
        while self.poll(quiet).await? {}
        log::debug!("peer quiet for {:?}, linger done", quiet);
        Ok(())
    }

    /// Release the transport.  The peer is not notified.
    pub fn close(self) {
        log::debug!(
            "closing stream: sent={} confirmed={} received={} [{}]",
            self.sender.sent_bytes(),
            self.sender.confirmed_bytes(),
            self.receiver.received_bytes(),
            self.stats
        );
        self.transport.close();
    }

    // -----------------------------------------------------------------------
    // Engine plumbing
    // -----------------------------------------------------------------------

    /// Carve one segment off the head of `unsent` and transmit it.
    async fn submit(&mut self, unsent: &[u8]) -> Result<usize, StreamError> {
        let segment = self.sender.carve(unsent, self.receiver.ack_number());
        let (seq, len) = (segment.seq, segment.payload.len());
        let fresh = self.transmit(segment).await?;
        self.stats.segments_sent += 1;
        log::debug!("→ DATA seq={} len={} accepted={}", seq, len, fresh);
        Ok(fresh)
    }

    /// Put `segment` on the wire and record it with the send engine.
    async fn transmit(&mut self, segment: Segment) -> Result<usize, StreamError> {
        let sent = self.transport.send(&segment.encode()).await?;
        let accepted = sent.saturating_sub(HEADER_LEN);
        self.sender.record_sent(segment, accepted, Instant::now())
    }

    async fn send_ack(&mut self) -> Result<(), StreamError> {
        let ack = self.sender.ack_segment(self.receiver.ack_number());
        log::trace!("→ ACK ack={}", ack.ack);
        self.transmit(ack).await?;
        self.stats.acks_sent += 1;
        Ok(())
    }

    /// Resend the oldest in-flight segment if it has expired (or `force`).
    async fn retransmit_oldest(&mut self, force: bool) -> Result<bool, StreamError> {
        let Some(mut segment) = self.sender.retransmit_oldest(Instant::now(), force) else {
            return Ok(false);
        };
        segment.ack = self.receiver.ack_number();
        log::debug!(
            "→ RETX seq={} len={}",
            segment.seq,
            segment.payload.len()
        );
        self.transmit(segment).await?;
        self.stats.retransmissions += 1;
        Ok(true)
    }

    /// Wait up to `timeout` for one datagram and feed it to both engines.
    ///
    /// Returns `true` if the peer was heard from.  Receive errors are logged
    /// and treated like a timeout; only send failures are fatal.
    async fn poll(&mut self, timeout: Duration) -> Result<bool, StreamError> {
        let datagram = match self
            .transport
            .recv(self.config.max_datagram(), timeout)
            .await
        {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return Ok(false),
            Err(e) => {
                log::warn!("receive failed, treating as silence: {}", e);
                tokio::time::sleep(timeout).await;
                return Ok(false);
            }
        };

        let segment = match Segment::decode(&datagram) {
            Ok(segment) => segment,
            Err(e) => {
                self.stats.malformed_datagrams += 1;
                log::warn!("discarding datagram: {}", e);
                return Ok(false);
            }
        };
        self.stats.segments_received += 1;
        self.on_segment(segment).await?;
        Ok(true)
    }

    /// Apply an inbound segment: reassemble its payload, consume its ACK.
    async fn on_segment(&mut self, segment: Segment) -> Result<(), StreamError> {
        let arrival = self.receiver.on_segment(segment.seq, &segment.payload);
        match arrival {
            Arrival::Advanced { delivered } => {
                log::debug!(
                    "← DATA seq={} len={} delivered={} rcv={}",
                    segment.seq,
                    segment.payload.len(),
                    delivered,
                    self.receiver.received_bytes()
                );
            }
            Arrival::Duplicate => {
                self.stats.duplicates_received += 1;
                log::debug!("← DUP seq={} len={}", segment.seq, segment.payload.len());
            }
            Arrival::Buffered => {
                self.stats.out_of_order_received += 1;
                log::debug!(
                    "← OOO seq={} len={} (expecting {})",
                    segment.seq,
                    segment.payload.len(),
                    self.receiver.received_bytes()
                );
            }
            Arrival::Empty => {}
        }

        let retired = self.sender.on_ack(segment.ack);
        if retired > 0 {
            log::debug!(
                "← ACK ack={} retired={} in_flight={}",
                segment.ack,
                retired,
                self.sender.in_flight()
            );
        }

        if arrival.wants_ack() {
            self.send_ack().await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{link, FaultConfig, SimTransport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Delivers queued datagrams but refuses every write.
    struct BrokenWire {
        inbound: VecDeque<Vec<u8>>,
        attempts: Arc<AtomicUsize>,
    }

    impl BrokenWire {
        fn new(inbound: Vec<Vec<u8>>) -> (Self, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            let wire = Self {
                inbound: inbound.into(),
                attempts: Arc::clone(&attempts),
            };
            (wire, attempts)
        }
    }

    #[async_trait]
    impl Transport for BrokenWire {
        async fn send(&mut self, _datagram: &[u8]) -> Result<usize, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "boom").into())
        }

        async fn recv(
            &mut self,
            _max_len: usize,
            timeout: Duration,
        ) -> Result<Option<Vec<u8>>, TransportError> {
            match self.inbound.pop_front() {
                Some(datagram) => Ok(Some(datagram)),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }
    }

    fn config() -> StreamConfig {
        StreamConfig::default()
            .with_mss(10)
            .with_ack_timeout(Duration::from_millis(10))
            .with_read_timeout(Duration::from_millis(10))
            .with_ack_crit_lag(5)
    }

    fn pair() -> (StreamConnection<SimTransport>, SimTransport) {
        let (a, b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        (StreamConnection::new(a, config()).unwrap(), b)
    }

    async fn next_segment(peer: &mut SimTransport) -> Segment {
        let raw = peer
            .recv(1024, Duration::from_secs(1))
            .await
            .unwrap()
            .expect("segment");
        Segment::decode(&raw).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let (a, _b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        let err = StreamConnection::new(a, StreamConfig::default().with_mss(0)).unwrap_err();
        assert!(matches!(err, StreamError::Config(ConfigError::ZeroMss)));
    }

    #[test]
    fn connection_keeps_its_config() {
        let (conn, _peer) = pair();
        assert_eq!(conn.config(), &config());
        assert_eq!(conn.config().max_datagram(), 10 + HEADER_LEN);
    }

    #[tokio::test]
    async fn write_failure_on_data_is_fatal_and_not_retried() {
        let (wire, attempts) = BrokenWire::new(Vec::new());
        let mut conn = StreamConnection::new(wire, config()).unwrap();

        let err = conn.send(b"hello").await.unwrap_err();
        assert!(matches!(err, StreamError::Transport(TransportError::Io(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(conn.sent_bytes(), 0);
        assert_eq!(conn.stats().segments_sent, 0);
        assert_eq!(conn.stats().retransmissions, 0);
    }

    #[tokio::test]
    async fn write_failure_on_ack_is_fatal() {
        let data = Segment::new(0, 0, b"hello".to_vec()).encode();
        let (wire, attempts) = BrokenWire::new(vec![data]);
        let mut conn = StreamConnection::new(wire, config()).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), conn.recv(5))
            .await
            .expect("recv must fail, not hang")
            .unwrap_err();
        assert!(matches!(err, StreamError::Transport(TransportError::Io(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(conn.received_bytes(), 5);
        assert_eq!(conn.sent_bytes(), 0);
        assert_eq!(conn.stats().acks_sent, 0);
    }

    #[tokio::test]
    async fn data_segment_is_acked_with_cumulative_offset() {
        let (mut conn, mut peer) = pair();
        peer.send(&Segment::new(0, 0, b"hello".to_vec()).encode())
            .await
            .unwrap();

        let got = conn.recv(5).await.unwrap();
        assert_eq!(got, b"hello");

        let ack = next_segment(&mut peer).await;
        assert!(ack.is_ack_only());
        assert_eq!(ack.seq, 0);
        assert_eq!(ack.ack, 5);
        assert_eq!(conn.stats().acks_sent, 1);
    }

    #[tokio::test]
    async fn duplicate_segment_is_reacked_not_redelivered() {
        let (mut conn, mut peer) = pair();
        let seg = Segment::new(0, 0, b"abc".to_vec()).encode();
        peer.send(&seg).await.unwrap();
        peer.send(&seg).await.unwrap();
        peer.send(&Segment::new(3, 0, b"def".to_vec()).encode())
            .await
            .unwrap();

        assert_eq!(conn.recv(6).await.unwrap(), b"abcdef");
        assert_eq!(conn.received_bytes(), 6);
        assert_eq!(conn.stats().duplicates_received, 1);

        let acks: Vec<u64> = [
            next_segment(&mut peer).await,
            next_segment(&mut peer).await,
            next_segment(&mut peer).await,
        ]
        .iter()
        .map(|s| s.ack)
        .collect();
        assert_eq!(acks, vec![3, 3, 6]);
    }

    #[tokio::test]
    async fn out_of_order_segment_withheld_until_gap_filled() {
        let (mut conn, mut peer) = pair();
        peer.send(&Segment::new(5, 0, b"world".to_vec()).encode())
            .await
            .unwrap();
        peer.send(&Segment::new(0, 0, b"hello".to_vec()).encode())
            .await
            .unwrap();

        assert_eq!(conn.recv(10).await.unwrap(), b"helloworld");
        assert_eq!(conn.stats().out_of_order_received, 1);

        // Duplicate ACK for the gap, then the cumulative one.
        assert_eq!(next_segment(&mut peer).await.ack, 0);
        assert_eq!(next_segment(&mut peer).await.ack, 10);
    }

    #[tokio::test]
    async fn send_completes_once_peer_acks_everything() {
        let (mut conn, mut peer) = pair();
        let sender = tokio::spawn(async move {
            let n = conn.send(b"0123456789abcdefghijklmno").await.unwrap();
            (n, conn)
        });

        let mut received = Vec::new();
        while received.len() < 25 {
            let seg = next_segment(&mut peer).await;
            if seg.seq as usize == received.len() {
                received.extend_from_slice(&seg.payload);
                peer.send(&Segment::ack_only(0, received.len() as u64).encode())
                    .await
                    .unwrap();
            }
        }

        let (n, conn) = sender.await.unwrap();
        assert_eq!(n, 25);
        assert_eq!(received, b"0123456789abcdefghijklmno");
        assert_eq!(conn.confirmed_bytes(), 25);
        assert_eq!(conn.stats().segments_sent, 3);
        assert_eq!(conn.stats().give_ups, 0);
    }

    #[tokio::test]
    async fn unacked_segment_is_retransmitted_unchanged() {
        let (mut conn, mut peer) = pair();
        let sender = tokio::spawn(async move {
            let n = conn.send(b"retry").await.unwrap();
            (n, conn)
        });

        let first = next_segment(&mut peer).await;
        let second = next_segment(&mut peer).await;
        assert_eq!(first.seq, second.seq);
        assert_eq!(first.payload, second.payload);

        peer.send(&Segment::ack_only(0, 5).encode()).await.unwrap();
        let (n, conn) = sender.await.unwrap();
        assert_eq!(n, 5);
        assert!(conn.stats().retransmissions >= 1);
    }

    #[tokio::test]
    async fn silent_peer_makes_send_give_up() {
        let (mut conn, _peer) = pair();
        let data = vec![7u8; 500];
        let n = tokio::time::timeout(Duration::from_secs(5), conn.send(&data))
            .await
            .expect("send must not hang")
            .unwrap();

        // Only one window's worth can be accepted without ACKs.
        assert_eq!(n, 100);
        assert!(n <= data.len());
        assert_eq!(conn.confirmed_bytes(), 0);
        assert_eq!(conn.stats().give_ups, 1);
    }

    #[tokio::test]
    async fn malformed_datagram_is_discarded() {
        let (mut conn, mut peer) = pair();
        peer.send(b"short").await.unwrap();
        peer.send(&Segment::new(0, 0, b"ok".to_vec()).encode())
            .await
            .unwrap();
        assert_eq!(conn.recv(2).await.unwrap(), b"ok");
        assert_eq!(conn.stats().malformed_datagrams, 1);
    }

    #[tokio::test]
    async fn linger_acks_late_retransmission() {
        let (mut conn, mut peer) = pair();
        peer.send(&Segment::new(0, 0, b"abc".to_vec()).encode())
            .await
            .unwrap();
        assert_eq!(conn.recv(3).await.unwrap(), b"abc");
        let _ = next_segment(&mut peer).await;

        // Pretend the ACK was lost and the peer resends.
        peer.send(&Segment::new(0, 0, b"abc".to_vec()).encode())
            .await
            .unwrap();
        conn.linger(Duration::from_millis(30)).await.unwrap();

        let reack = next_segment(&mut peer).await;
        assert_eq!(reack.ack, 3);
    }
}
