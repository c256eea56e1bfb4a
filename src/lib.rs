#![doc(html_root_url = "https://docs.rs/amqp_robust/latest")]
//! Automatic recovery for AMQP-style channels.
//!
//! A [`RobustChannel`] outlives the low-level channels it runs on. When the
//! transport drops, it blocks new operations, re-opens itself once the
//! connection is back, re-applies its QoS, and re-declares every exchange
//! and queue its callers still hold, before letting operations through
//! again. The supporting pieces are usable on their own: a broadcast
//! registry with strong and weak subscribers, a one-shot guard, and a
//! weakly-held entity registry.

pub mod callbacks;
pub mod channel;
pub mod config;
pub mod entity;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod oneshot;
pub mod options;
pub mod recovery;
pub mod registry;
pub mod transport;

pub use channel::{ChannelState, RobustChannel};
pub use entity::{Restorable, RobustExchange, RobustQueue};
pub use error::{CallbackError, ChannelError, OneShotError, TransportError};
pub use metrics::{CALLBACK_FAILURES_TOTAL, CHANNELS_READY, RESTORE_FAILURES_TOTAL, RESTORES_TOTAL};
