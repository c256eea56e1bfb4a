//! Caller-facing options for channel operations.
//!
//! Each options type carries the protocol flags of its operation plus the
//! recovery-specific `robust` switch where it applies.

use log::warn;

use crate::transport::{
    ExchangeDeclare,
    ExchangeDelete,
    ExchangeKind,
    FieldTable,
    FieldValue,
    Qos,
    QueueDeclare,
    QueueDelete,
};

/// Options for [`crate::RobustChannel::declare_exchange`].
///
/// `robust` defaults to `true`: the exchange is re-declared after every
/// recovery for as long as some caller holds its handle.
#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeOptions {
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub passive: bool,
    pub arguments: FieldTable,
    pub robust: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            kind: ExchangeKind::default(),
            durable: false,
            auto_delete: false,
            internal: false,
            passive: false,
            arguments: FieldTable::new(),
            robust: true,
        }
    }
}

impl ExchangeOptions {
    #[must_use]
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Internal exchanges are never tracked for recovery.
    #[must_use]
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    #[must_use]
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    #[must_use]
    pub fn argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Opt in or out of recovery tracking.
    #[must_use]
    pub fn robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    /// Whether an exchange declared with these options is re-declared on
    /// recovery.
    #[must_use]
    pub fn is_tracked(&self) -> bool { self.robust && !self.internal }

    pub(crate) fn declare(&self, name: &str) -> ExchangeDeclare {
        ExchangeDeclare {
            name: name.to_owned(),
            kind: self.kind.clone(),
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            passive: self.passive,
            arguments: self.arguments.clone(),
        }
    }
}

/// Options for [`crate::RobustChannel::declare_queue`].
///
/// `robust` defaults to `true`.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub arguments: FieldTable,
    pub robust: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: false,
            exclusive: false,
            auto_delete: false,
            passive: false,
            arguments: FieldTable::new(),
            robust: true,
        }
    }
}

impl QueueOptions {
    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    #[must_use]
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    #[must_use]
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    #[must_use]
    pub fn argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Opt in or out of recovery tracking.
    #[must_use]
    pub fn robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    pub(crate) fn declare(&self, name: &str) -> QueueDeclare {
        QueueDeclare {
            name: name.to_owned(),
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            passive: self.passive,
            arguments: self.arguments.clone(),
        }
    }
}

/// Options for [`crate::RobustChannel::exchange_delete`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeleteOptions {
    pub if_unused: bool,
    pub nowait: bool,
}

impl ExchangeDeleteOptions {
    pub(crate) fn delete(self, name: &str) -> ExchangeDelete {
        ExchangeDelete {
            name: name.to_owned(),
            if_unused: self.if_unused,
            nowait: self.nowait,
        }
    }
}

/// Options for [`crate::RobustChannel::queue_delete`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDeleteOptions {
    pub if_unused: bool,
    pub if_empty: bool,
    pub nowait: bool,
}

impl QueueDeleteOptions {
    pub(crate) fn delete(self, name: &str) -> QueueDelete {
        QueueDelete {
            name: name.to_owned(),
            if_unused: self.if_unused,
            if_empty: self.if_empty,
            nowait: self.nowait,
        }
    }
}

/// Options for [`crate::RobustChannel::set_qos`].
///
/// # Examples
///
/// ```
/// use amqp_robust::options::QosOptions;
///
/// let qos = QosOptions::default().prefetch_count(10).resolve();
/// assert_eq!(qos.prefetch_count, 10);
/// assert!(!qos.global);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QosOptions {
    prefetch_count: u16,
    prefetch_size: u32,
    global: Option<bool>,
    all_channels: Option<bool>,
}

impl QosOptions {
    #[must_use]
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    #[must_use]
    pub fn prefetch_size(mut self, size: u32) -> Self {
        self.prefetch_size = size;
        self
    }

    /// Apply the limits connection-wide.
    #[must_use]
    pub fn global(mut self, global: bool) -> Self {
        self.global = Some(global);
        self
    }

    /// Former name of [`global`](Self::global).
    ///
    /// When both are supplied, `global` wins.
    #[deprecated(note = "use `global` instead")]
    #[must_use]
    pub fn all_channels(mut self, all_channels: bool) -> Self {
        self.all_channels = Some(all_channels);
        self
    }

    /// Produce the `basic.qos` arguments, warning about deprecated flags.
    #[must_use]
    pub fn resolve(self) -> Qos {
        if let Some(all_channels) = self.all_channels {
            warn!(
                "deprecated qos flag used: all_channels={all_channels}, global={:?}; use `global` \
                 instead",
                self.global
            );
        }
        Qos {
            prefetch_count: self.prefetch_count,
            prefetch_size: self.prefetch_size,
            global: self.global.or(self.all_channels).unwrap_or(false),
        }
    }
}
