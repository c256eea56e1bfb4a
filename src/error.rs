//! Error types shared across the recovery layer.

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Boxed error returned by broadcast subscribers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by the low-level transport.
///
/// The type is cheap to clone so a single outcome can be handed to every
/// caller that joined a shared operation.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The low-level channel has been closed.
    #[error("channel closed")]
    ChannelClosed,
    /// The connection to the peer is gone.
    #[error("connection lost")]
    ConnectionLost,
    /// The peer rejected an RPC.
    #[error("rpc rejected: code={code}, text={text}")]
    Rpc {
        /// Protocol reply code.
        code: u16,
        /// Reply text supplied by the peer.
        text: String,
    },
    /// I/O failure on the underlying socket.
    #[error("transport i/o error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self { Self::Io(Arc::new(value)) }
}

/// Errors returned by [`crate::RobustChannel`] and the entities it owns.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// A transport RPC failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The channel was closed explicitly by its owner.
    #[error("channel was closed explicitly")]
    Closed,
    /// The channel has no live low-level channel to talk to.
    #[error("channel is not open")]
    NotOpen,
    /// The requested transition is not valid from the current state.
    #[error("invalid channel state for {operation}: {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the channel was in.
        state: crate::ChannelState,
    },
    /// An RPC did not complete within the configured limit.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),
    /// The channel owning an entity has been dropped.
    #[error("owning channel has been dropped")]
    ChannelGone,
    /// The close sequence was abandoned before it produced an outcome.
    #[error(transparent)]
    Close(#[from] OneShotError),
}

/// Errors returned when mutating a [`crate::callbacks::CallbackCollection`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CallbackError {
    /// The collection is frozen and rejects mutation.
    #[error("callback collection is frozen")]
    Frozen,
}

/// Errors returned by [`crate::oneshot::OneShot`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum OneShotError {
    /// The guarded action panicked or was cancelled before completing.
    #[error("one-shot action was abandoned before completing")]
    Abandoned,
}

/// A subscriber continuation panicked while a broadcast was gathering.
#[derive(Debug, Error)]
#[error("callback panicked: {0}")]
pub struct CallbackPanicked(pub String);
