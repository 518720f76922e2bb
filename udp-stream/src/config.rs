//! Construction-time tunables for a [`crate::stream::StreamConnection`].
//!
//! Every knob has a default suitable for loopback and LAN use; callers
//! override individual values with the `with_*` builders and the connection
//! runs [`StreamConfig::validate`] before accepting the config.

use std::time::Duration;

use thiserror::Error;

use crate::segment::HEADER_LEN;

/// Default maximum segment size (payload bytes per datagram).
pub const DEFAULT_MSS: usize = 1000;
/// Default send window, expressed in segments.
pub const DEFAULT_WINDOW_SEGMENTS: usize = 10;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Consecutive silent polls after which the peer is presumed gone.
pub const DEFAULT_ACK_CRIT_LAG: u32 = 10;

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Largest payload carried by a single segment.
    pub mss: usize,
    /// Maximum number of sent-but-unconfirmed bytes.
    pub window_size: usize,
    /// Age after which an unconfirmed segment is retransmitted. Also the poll
    /// timeout used by `send` while waiting for ACKs.
    pub ack_timeout: Duration,
    /// Poll timeout used by `recv` while waiting for data.
    pub read_timeout: Duration,
    /// Number of consecutive unanswered polls before `send` gives up.
    pub ack_crit_lag: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            window_size: DEFAULT_MSS * DEFAULT_WINDOW_SEGMENTS,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            ack_crit_lag: DEFAULT_ACK_CRIT_LAG,
        }
    }
}

impl StreamConfig {
    /// Set the MSS and rescale the window to the default number of segments.
    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss;
        self.window_size = mss.saturating_mul(DEFAULT_WINDOW_SEGMENTS);
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_ack_crit_lag(mut self, ack_crit_lag: u32) -> Self {
        self.ack_crit_lag = ack_crit_lag;
        self
    }

    /// Largest datagram this configuration can produce or accept.
    pub fn max_datagram(&self) -> usize {
        self.mss + HEADER_LEN
    }

    /// Reject combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.window_size < self.mss {
            return Err(ConfigError::WindowBelowMss {
                window_size: self.window_size,
                mss: self.mss,
            });
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::ZeroAckTimeout);
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }
        if self.ack_crit_lag == 0 {
            return Err(ConfigError::ZeroCritLag);
        }
        Ok(())
    }
}

/// A tunable was set to a value the protocol cannot operate with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mss must be at least one byte")]
    ZeroMss,
    #[error("window_size {window_size} is smaller than one segment (mss {mss})")]
    WindowBelowMss { window_size: usize, mss: usize },
    #[error("ack_timeout must be non-zero")]
    ZeroAckTimeout,
    #[error("read_timeout must be non-zero")]
    ZeroReadTimeout,
    #[error("ack_crit_lag must be at least one round")]
    ZeroCritLag,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = StreamConfig::default();
        assert_eq!(c.mss, 1000);
        assert_eq!(c.window_size, 10_000);
        assert_eq!(c.ack_timeout, Duration::from_millis(50));
        assert_eq!(c.read_timeout, Duration::from_millis(50));
        assert_eq!(c.ack_crit_lag, 10);
        assert_eq!(c.max_datagram(), 1016);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn with_mss_rescales_window() {
        let c = StreamConfig::default().with_mss(10);
        assert_eq!(c.mss, 10);
        assert_eq!(c.window_size, 100);
    }

    #[test]
    fn explicit_window_overrides_rescale() {
        let c = StreamConfig::default().with_mss(10).with_window_size(35);
        assert_eq!(c.window_size, 35);
    }

    #[test]
    fn zero_mss_rejected() {
        let c = StreamConfig::default().with_mss(0);
        assert_eq!(c.validate(), Err(ConfigError::ZeroMss));
    }

    #[test]
    fn window_smaller_than_mss_rejected() {
        let c = StreamConfig::default().with_window_size(999);
        assert_eq!(
            c.validate(),
            Err(ConfigError::WindowBelowMss {
                window_size: 999,
                mss: 1000
            })
        );
    }

    #[test]
    fn zero_timeouts_and_lag_rejected() {
        let base = StreamConfig::default();
        assert_eq!(
            base.clone().with_ack_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroAckTimeout)
        );
        assert_eq!(
            base.clone().with_read_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroReadTimeout)
        );
        assert_eq!(
            base.with_ack_crit_lag(0).validate(),
            Err(ConfigError::ZeroCritLag)
        );
    }
}
