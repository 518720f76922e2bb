//! Datagram transport contract and its UDP implementation.
//!
//! The stream layer never touches a socket directly.  It talks to a
//! [`Transport`]: something bound to one local endpoint, aimed at one fixed
//! peer, that can send a datagram and receive one with an explicit timeout.
//! [`UdpTransport`] is the real-network implementation; the
//! [`crate::simulator`] module provides an in-memory one for tests.
//!
//! Transports move raw bytes only; segment encoding lives in
//! [`crate::segment`].

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying I/O error from the OS.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// A point-to-point, unreliable, unordered datagram channel.
#[async_trait]
pub trait Transport: Send {
    /// Send one datagram to the peer.
    ///
    /// Returns the number of bytes that went out, which may be fewer than
    /// `datagram.len()`.
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for one datagram of at most `max_len` bytes.
    ///
    /// `Ok(None)` means nothing arrived in time.  A zero timeout polls
    /// without waiting.
    async fn recv(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the transport.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// A [`Transport`] over a `tokio::net::UdpSocket` with one fixed peer.
///
/// Datagrams from any other address are dropped.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    peer: SocketAddr,
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind `local_addr` and fix `peer` as the only correspondent.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr, peer: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("udp transport bound on {} for peer {}", local_addr, peer);
        Ok(Self {
            local_addr,
            peer,
            inner,
        })
    }

    /// Bind a socket without knowing the peer yet.
    ///
    /// Useful when both ends pick ephemeral ports: bind both with
    /// [`bind_unaimed`](Self::bind_unaimed), then exchange addresses and call
    /// [`aim`](Self::aim).
    pub async fn bind_unaimed(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            peer: local_addr,
            inner,
        })
    }

    /// Fix the peer address.
    pub fn aim(mut self, peer: SocketAddr) -> Self {
        self.peer = peer;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn accept_from(&self, addr: SocketAddr) -> bool {
        if addr == self.peer {
            return true;
        }
        log::trace!("dropping datagram from stranger {}", addr);
        false
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError> {
        Ok(self.inner.send_to(datagram, self.peer).await?)
    }

    async fn recv(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; max_len];

        if timeout.is_zero() {
            loop {
                match self.inner.try_recv_from(&mut buf) {
                    Ok((n, addr)) if self.accept_from(addr) => {
                        buf.truncate(n);
                        return Ok(Some(buf));
                    }
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.inner.recv_from(&mut buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok((n, addr))) if self.accept_from(addr) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn close(self) {
        log::debug!("closing udp transport on {}", self.local_addr);
        drop(self.inner);
    }
}
