//! Metric helpers for the recovery layer.
//!
//! Names are exported unconditionally so dashboards can reference them; the
//! recording helpers compile to no-ops when the `metrics` feature is off.

/// Counter of completed channel restorations.
pub const RESTORES_TOTAL: &str = "amqp_robust_restores_total";
/// Counter of restoration attempts that returned an error.
pub const RESTORE_FAILURES_TOTAL: &str = "amqp_robust_restore_failures_total";
/// Counter of broadcast subscribers that failed or panicked.
pub const CALLBACK_FAILURES_TOTAL: &str = "amqp_robust_callback_failures_total";
/// Gauge of channels currently ready for operations.
pub const CHANNELS_READY: &str = "amqp_robust_channels_ready";

/// How a subscriber failed.
#[derive(Clone, Copy, Debug)]
pub enum FailureKind {
    /// The subscriber returned an error.
    Error,
    /// The subscriber panicked.
    Panic,
}

impl FailureKind {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            FailureKind::Error => "error",
            FailureKind::Panic => "panic",
        }
    }
}

#[cfg(feature = "metrics")]
mod imp {
    use metrics::{counter, gauge};

    use super::{
        CALLBACK_FAILURES_TOTAL,
        CHANNELS_READY,
        FailureKind,
        RESTORE_FAILURES_TOTAL,
        RESTORES_TOTAL,
    };

    pub fn inc_restores() { counter!(RESTORES_TOTAL).increment(1); }

    pub fn inc_restore_failures() { counter!(RESTORE_FAILURES_TOTAL).increment(1); }

    pub fn inc_callback_failures(kind: FailureKind) {
        counter!(CALLBACK_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    pub fn inc_ready_channels() { gauge!(CHANNELS_READY).increment(1.0); }

    pub fn dec_ready_channels() { gauge!(CHANNELS_READY).decrement(1.0); }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    use super::FailureKind;

    pub fn inc_restores() {}

    pub fn inc_restore_failures() {}

    pub fn inc_callback_failures(_kind: FailureKind) {}

    pub fn inc_ready_channels() {}

    pub fn dec_ready_channels() {}
}

/// Record a completed restoration.
pub fn inc_restores() { imp::inc_restores(); }

/// Record a restoration attempt that failed.
pub fn inc_restore_failures() { imp::inc_restore_failures(); }

/// Record a subscriber failure of the given kind.
pub fn inc_callback_failures(kind: FailureKind) { imp::inc_callback_failures(kind); }

/// Record a channel becoming ready.
pub fn inc_ready_channels() { imp::inc_ready_channels(); }

/// Record a channel leaving the ready state.
pub fn dec_ready_channels() { imp::dec_ready_channels(); }
