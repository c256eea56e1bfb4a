//! Test support for `amqp_robust`.
//!
//! Provides an rstest [`session`] fixture pairing a
//! [`MemoryBroker`](amqp_robust::memory::MemoryBroker) with a channel,
//! journal assertions, serialised log capture, and metric snapshots.
//!
//! ```rust
//! use amqp_robust::config::ChannelConfig;
//! use amqp_robust_testing::{Session, declarations};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let Session { broker, channel } = Session::with_config(ChannelConfig::default());
//! channel.open().await.unwrap();
//! assert!(declarations(&broker.journal()).is_empty());
//! # }
//! ```

pub mod journal;
pub mod logging;
pub mod macros;
pub mod recorder;

pub use journal::{
    Session,
    assert_restore_order,
    count,
    declarations,
    first,
    session,
    wait_for_state,
};
pub use logging::{LoggerHandle, logger};
pub use recorder::{counter, debugging_recorder_setup, gauge};
