//! Push channel connection state and reconnection policy.

use std::time::Duration;

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// The channel is open; messages go over it.
    Open,
    /// The channel is down; messages use the fallback endpoint until the
    /// next reconnect succeeds.
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    ///
    /// `Connecting → Closed` covers an attempt that fails before opening.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closed)
                | (Self::Open, Self::Closed)
                | (Self::Closed, Self::Connecting)
        )
    }

    /// Whether outbound messages can use the push channel.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// How long to wait before the next reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every close.
    Fixed(Duration),
    /// Delay doubles per consecutive failure, starting at `base`, capped at `max`.
    Backoff {
        /// Delay after the first failure.
        base: Duration,
        /// Upper bound on the delay.
        max: Duration,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(3))
    }
}

impl ReconnectPolicy {
    /// Delay before reconnecting after `failures` consecutive failures
    /// (`1` for the first close after a successful open).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Backoff { base, max } => {
                let exponent = failures.saturating_sub(1).min(16);
                base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
            }
        }
    }
}
