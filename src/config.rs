//! Channel configuration.

use std::time::Duration;

/// Smallest RPC timeout accepted by [`ChannelConfig::normalized`].
pub const MIN_RPC_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration applied to a [`crate::RobustChannel`].
///
/// # Default Values
/// - `channel_number`: `None` (the connection picks one)
/// - `rpc_timeout`: `None` (RPCs may wait indefinitely)
///
/// # Invariants
/// - `channel_number` is never `Some(0)`; channel zero belongs to the
///   connection itself
/// - `rpc_timeout`, when set, is at least [`MIN_RPC_TIMEOUT`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Channel number requested from the connection on every open.
    pub channel_number: Option<u16>,
    /// Limit applied to every declare, delete, bind and QoS RPC.
    pub rpc_timeout: Option<Duration>,
}

impl ChannelConfig {
    /// Request a specific channel number.
    #[must_use]
    pub fn channel_number(mut self, number: u16) -> Self {
        self.channel_number = Some(number);
        self
    }

    /// Bound every RPC by `limit`.
    #[must_use]
    pub fn rpc_timeout(mut self, limit: Duration) -> Self {
        self.rpc_timeout = Some(limit);
        self
    }

    /// Clamp values to sane bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use amqp_robust::config::{ChannelConfig, MIN_RPC_TIMEOUT};
    ///
    /// let cfg = ChannelConfig::default()
    ///     .channel_number(0)
    ///     .rpc_timeout(Duration::ZERO)
    ///     .normalized();
    ///
    /// assert_eq!(cfg.channel_number, None);
    /// assert_eq!(cfg.rpc_timeout, Some(MIN_RPC_TIMEOUT));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.channel_number = self.channel_number.filter(|number| *number != 0);
        self.rpc_timeout = self.rpc_timeout.map(|limit| limit.max(MIN_RPC_TIMEOUT));
        self
    }
}
