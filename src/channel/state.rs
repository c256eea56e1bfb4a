//! Lifecycle states of a [`super::RobustChannel`].

use std::fmt;

/// Where a channel is in its open/restore cycle.
///
/// ```text
/// Closed -> Opening -> OpenNotReady -> Ready -> Restoring -> Ready ...
///                                        \______________\-> Closed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Not open. Initial state, and final state after an explicit close.
    #[default]
    Closed,
    /// The open handshake is in progress.
    Opening,
    /// The low-level channel is open but QoS and entities are still being
    /// restored.
    OpenNotReady,
    /// Fully restored; operations proceed.
    Ready,
    /// The low-level channel was lost and a restoration is pending or
    /// running.
    Restoring,
}

impl ChannelState {
    /// Whether operations may proceed without waiting.
    #[must_use]
    pub fn is_ready(self) -> bool { matches!(self, Self::Ready) }

    fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::OpenNotReady => "open-not-ready",
            Self::Ready => "ready",
            Self::Restoring => "restoring",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
