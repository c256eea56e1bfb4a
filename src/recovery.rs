//! Retry loop for channel restoration.
//!
//! [`RobustChannel::restore`] makes a single attempt and reports failure to
//! its caller. [`RestoreSupervisor`] is that caller: it retries with
//! exponential back-off until the channel is restored, closed, or the
//! supervisor is cancelled.

mod backoff;

use std::sync::Arc;

pub use backoff::BackoffConfig;
use log::{debug, info, warn};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ChannelState, RobustChannel},
    error::ChannelError,
};

/// How a supervised restoration ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The channel is restored; `attempts` counts calls to `restore`.
    Restored { attempts: u32 },
    /// The supervisor was cancelled first.
    Cancelled,
}

/// Drives [`RobustChannel::restore`] until it succeeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestoreSupervisor {
    backoff: BackoffConfig,
}

impl RestoreSupervisor {
    /// Create a supervisor using `backoff` between failed attempts.
    #[must_use]
    pub fn new(backoff: BackoffConfig) -> Self {
        let backoff = backoff.normalized();
        debug_assert!(
            backoff.initial_delay <= backoff.max_delay,
            "BackoffConfig invariant violated: initial_delay > max_delay"
        );
        Self { backoff }
    }

    /// Effective back-off configuration.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig { self.backoff }

    /// Call `restore` until it succeeds or `shutdown` is cancelled.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`], [`ChannelError::ChannelGone`] or
    /// [`ChannelError::InvalidState`] immediately, since retrying cannot
    /// help. Every other error is logged and retried.
    pub async fn restore_with_retry(
        &self,
        channel: &RobustChannel,
        shutdown: &CancellationToken,
    ) -> Result<RestoreOutcome, ChannelError> {
        let mut delay = self.backoff.initial_delay;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = select! {
                biased;

                () = shutdown.cancelled() => return Ok(RestoreOutcome::Cancelled),
                res = channel.restore() => res,
            };
            match result {
                Ok(()) => return Ok(RestoreOutcome::Restored { attempts }),
                Err(
                    e @ (ChannelError::Closed
                    | ChannelError::ChannelGone
                    | ChannelError::InvalidState { .. }),
                ) => return Err(e),
                Err(e) => {
                    warn!("restore attempt failed: attempt={attempts}, retry_in={delay:?}, error={e}");
                    select! {
                        biased;

                        () = shutdown.cancelled() => return Ok(RestoreOutcome::Cancelled),
                        () = sleep(delay) => {}
                    }
                    delay = self.backoff.next_delay(delay);
                }
            }
        }
    }

    /// Watch `channel` and supervise every restoration it enters.
    ///
    /// Returns when `shutdown` is cancelled or the channel is closed
    /// explicitly. A forced teardown only pauses supervision until the
    /// channel is reopened and lost again.
    pub async fn run(&self, channel: Arc<RobustChannel>, shutdown: CancellationToken) {
        let mut states = channel.state_changes();
        loop {
            let restoring = select! {
                biased;

                () = shutdown.cancelled() => false,
                () = channel.closed() => false,
                res = states.wait_for(|state| *state == ChannelState::Restoring) => res.is_ok(),
            };
            if !restoring {
                debug!("restore supervisor stopping: channel={:?}", channel.number());
                return;
            }
            match self.restore_with_retry(&channel, &shutdown).await {
                Ok(RestoreOutcome::Restored { attempts }) => {
                    info!("supervised restore finished: attempts={attempts}");
                }
                Ok(RestoreOutcome::Cancelled) => return,
                // Torn down while restoring; wait for the owner to reopen.
                Err(ChannelError::InvalidState { state, .. }) => {
                    debug!("restore abandoned, channel not open: state={state}");
                }
                Err(e) => {
                    debug!("restore supervisor stopping: error={e}");
                    return;
                }
            }
        }
    }
}
