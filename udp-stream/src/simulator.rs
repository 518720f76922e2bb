//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides [`link`], which returns two connected
//! [`SimTransport`] ends.  Each direction applies its own [`FaultConfig`]
//! on the way out:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Periodic drop    | Drop every `n`-th datagram (`drop_every`).           |
//! | Random loss      | Drop a datagram with probability `loss_rate`.        |
//! | Duplication      | Deliver a datagram twice (`duplicate_rate`).         |
//! | Reordering       | Hold a datagram back until the next one has gone     |
//! |                  | out, so it is overtaken (`reorder_rate`).            |
//!
//! Random faults draw from a `StdRng` seeded by `FaultConfig::seed`, so a
//! failing run replays exactly.  Sending after the other end has been dropped
//! is silently discarded, the same way UDP to a dead host is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::transport::{Transport, TransportError};

/// Fault model for one direction of a link.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside are
/// clamped.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Drop the `n`-th, `2n`-th, … datagram.
    pub drop_every: Option<u64>,
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is overtaken by its successor.
    pub reorder_rate: f64,
    /// RNG seed for the random faults.
    pub seed: u64,
}

impl FaultConfig {
    /// A perfect wire: no faults.
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn drop_every(n: u64) -> Self {
        Self {
            drop_every: Some(n),
            ..Self::default()
        }
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate;
        self
    }

    pub fn with_duplicate_rate(mut self, rate: f64) -> Self {
        self.duplicate_rate = rate;
        self
    }

    pub fn with_reorder_rate(mut self, rate: f64) -> Self {
        self.reorder_rate = rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Counters for one direction of a link, shared with the test harness.
#[derive(Debug, Default)]
pub struct LinkStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    reordered: AtomicU64,
}

impl LinkStats {
    /// Datagrams handed to the link by the sender.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Datagrams placed on the receiver's queue, duplicates included.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn duplicated(&self) -> u64 {
        self.duplicated.load(Ordering::Relaxed)
    }

    pub fn reordered(&self) -> u64 {
        self.reordered.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Create two connected simulator ends.
///
/// `a_to_b` governs datagrams sent by the first end, `b_to_a` those sent by
/// the second.
pub fn link(a_to_b: FaultConfig, b_to_a: FaultConfig) -> (SimTransport, SimTransport) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();
    let a = SimTransport::new(tx_ab, rx_ba, a_to_b);
    let b = SimTransport::new(tx_ba, rx_ab, b_to_a);
    (a, b)
}

/// One end of a simulated link.
#[derive(Debug)]
pub struct SimTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    config: FaultConfig,
    rng: StdRng,
    /// Datagrams submitted so far, for `drop_every`.
    counter: u64,
    /// A datagram waiting to be overtaken.
    held: Option<Vec<u8>>,
    stats: Arc<LinkStats>,
}

impl SimTransport {
    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        config: FaultConfig,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            tx,
            rx,
            config,
            rng,
            counter: 0,
            held: None,
            stats: Arc::new(LinkStats::default()),
        }
    }

    /// Counters for datagrams this end sends.
    pub fn outbound_stats(&self) -> Arc<LinkStats> {
        Arc::clone(&self.stats)
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.random_bool(rate.clamp(0.0, 1.0))
    }

    fn deliver(&self, datagram: Vec<u8>) {
        // A closed receiver is a dead host: the datagram just vanishes.
        if self.tx.send(datagram).is_ok() {
            LinkStats::bump(&self.stats.delivered);
        } else {
            log::trace!("sim: peer gone, datagram discarded");
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError> {
        self.counter += 1;
        LinkStats::bump(&self.stats.submitted);

        let periodic = self
            .config
            .drop_every
            .is_some_and(|n| n > 0 && self.counter % n == 0);
        if periodic || self.roll(self.config.loss_rate) {
            LinkStats::bump(&self.stats.dropped);
            log::trace!("sim: dropped datagram #{}", self.counter);
            return Ok(datagram.len());
        }

        let copies = if self.roll(self.config.duplicate_rate) {
            LinkStats::bump(&self.stats.duplicated);
            2
        } else {
            1
        };

        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            LinkStats::bump(&self.stats.reordered);
            self.held = Some(datagram.to_vec());
            return Ok(datagram.len());
        }

        for _ in 0..copies {
            self.deliver(datagram.to_vec());
        }
        if let Some(late) = self.held.take() {
            self.deliver(late);
        }
        Ok(datagram.len())
    }

    async fn recv(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let received = if timeout.is_zero() {
            match self.rx.try_recv() {
                Ok(datagram) => Some(datagram),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            }
        } else {
            let deadline = tokio::time::Instant::now() + timeout;
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(datagram)) => Some(datagram),
                Ok(None) => {
                    // Peer end dropped: behave like a silent network.
                    tokio::time::sleep_until(deadline).await;
                    None
                }
                Err(_elapsed) => None,
            }
        };

        Ok(received.map(|mut datagram| {
            datagram.truncate(max_len);
            datagram
        }))
    }

    fn close(mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    async fn drain(end: &mut SimTransport) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(d) = end.recv(64, Duration::ZERO).await.unwrap() {
            out.push(d);
        }
        out
    }

    #[tokio::test]
    async fn lossless_link_preserves_order() {
        let (mut a, mut b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        for i in 0..5u8 {
            a.send(&[i]).await.unwrap();
        }
        let got = drain(&mut b).await;
        assert_eq!(got, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn drop_every_third() {
        let (mut a, mut b) = link(FaultConfig::drop_every(3), FaultConfig::lossless());
        for i in 1..=7u8 {
            a.send(&[i]).await.unwrap();
        }
        let got = drain(&mut b).await;
        assert_eq!(got, vec![vec![1], vec![2], vec![4], vec![5], vec![7]]);

        let stats = a.outbound_stats();
        assert_eq!(stats.submitted(), 7);
        assert_eq!(stats.dropped(), 2);
        assert_eq!(stats.delivered(), 5);
    }

    #[tokio::test]
    async fn duplication_delivers_twice() {
        let cfg = FaultConfig::lossless().with_duplicate_rate(1.0);
        let (mut a, mut b) = link(cfg, FaultConfig::lossless());
        a.send(b"x").await.unwrap();
        assert_eq!(drain(&mut b).await, vec![b"x".to_vec(), b"x".to_vec()]);
        assert_eq!(a.outbound_stats().duplicated(), 1);
    }

    #[tokio::test]
    async fn reordering_swaps_neighbours() {
        let cfg = FaultConfig::lossless().with_reorder_rate(1.0);
        let (mut a, mut b) = link(cfg, FaultConfig::lossless());
        for d in [b"A", b"B", b"C", b"D"] {
            a.send(d).await.unwrap();
        }
        let got = drain(&mut b).await;
        assert_eq!(
            got,
            vec![b"B".to_vec(), b"A".to_vec(), b"D".to_vec(), b"C".to_vec()]
        );
    }

    #[tokio::test]
    async fn oversized_datagram_truncated() {
        let (mut a, mut b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        a.send(b"0123456789").await.unwrap();
        let got = b.recv(4, WAIT).await.unwrap();
        assert_eq!(got, Some(b"0123".to_vec()));
    }

    #[tokio::test]
    async fn silent_link_times_out() {
        let (_a, mut b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        assert!(b.recv(64, WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_peer_looks_like_silence() {
        let (mut a, b) = link(FaultConfig::lossless(), FaultConfig::lossless());
        b.close();
        assert_eq!(a.send(b"hello?").await.unwrap(), 6);
        assert_eq!(a.outbound_stats().delivered(), 0);

        let started = tokio::time::Instant::now();
        assert!(a.recv(64, WAIT).await.unwrap().is_none());
        assert!(started.elapsed() >= WAIT);
    }

    #[tokio::test]
    async fn seeded_loss_is_reproducible() {
        async fn survivors(seed: u64) -> Vec<Vec<u8>> {
            let cfg = FaultConfig::lossless().with_loss_rate(0.5).with_seed(seed);
            let (mut a, mut b) = link(cfg, FaultConfig::lossless());
            for i in 0..32u8 {
                a.send(&[i]).await.unwrap();
            }
            drain(&mut b).await
        }
        assert_eq!(survivors(7).await, survivors(7).await);
    }
}
