//! Boundary consumed from the protocol layer.
//!
//! The recovery layer never speaks the wire protocol itself. It drives a
//! [`Connection`] that hands out low-level channels implementing
//! [`Transport`], and issues declare/delete/bind RPCs against them. The
//! argument records below mirror the protocol methods; the acknowledgement
//! records mirror their replies.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::TransportError;

/// Value stored in a declaration argument table.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Nested table.
    Table(FieldTable),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self { Self::Bool(value) }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self { Self::Int(value) }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self { Self::Float(value) }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self { Self::Str(value.to_owned()) }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self { Self::Str(value) }
}

/// Declaration arguments (`x-message-ttl`, `alternate-exchange`, …).
pub type FieldTable = BTreeMap<String, FieldValue>;

/// Routing behaviour of an exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Route on exact routing-key match.
    #[default]
    Direct,
    /// Route to every bound queue.
    Fanout,
    /// Route on routing-key patterns.
    Topic,
    /// Route on message headers.
    Headers,
    /// Broker-specific exchange type.
    Custom(String),
}

impl ExchangeKind {
    /// Protocol name of the exchange type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
            Self::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Arguments of `exchange.declare`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclare {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub passive: bool,
    pub arguments: FieldTable,
}

/// Arguments of `exchange.delete`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDelete {
    pub name: String,
    pub if_unused: bool,
    pub nowait: bool,
}

/// Arguments of `exchange.bind` and `exchange.unbind`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeBind {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

/// Arguments of `queue.declare`. An empty name asks the peer to generate one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclare {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub arguments: FieldTable,
}

/// Arguments of `queue.delete`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDelete {
    pub name: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub nowait: bool,
}

/// Arguments of `queue.bind` and `queue.unbind`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

/// Arguments of `basic.qos`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Qos {
    /// Maximum number of unacknowledged deliveries; zero means unlimited.
    pub prefetch_count: u16,
    /// Maximum size in octets of unacknowledged deliveries; zero means unlimited.
    pub prefetch_size: u32,
    /// Apply the limits to the whole connection instead of this channel.
    pub global: bool,
}

/// Reply to `exchange.declare`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOk;

/// Reply to `exchange.delete`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeleteOk;

/// Reply to `exchange.bind` / `queue.bind`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindOk;

/// Reply to `exchange.unbind` / `queue.unbind`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnbindOk;

/// Reply to `queue.declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDeclareOk {
    /// Name of the queue, generated by the peer when the request named none.
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Reply to `queue.delete`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDeleteOk {
    /// Number of messages discarded with the queue.
    pub message_count: u32,
}

/// Reply to `basic.qos`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QosOk;

/// Why a low-level channel closed.
#[derive(Clone, Debug)]
pub enum CloseReason {
    /// The owner closed the channel on purpose.
    Explicit,
    /// The channel was torn down from above, for example because its
    /// connection is being closed. Never triggers recovery.
    Cancelled,
    /// The channel was lost to a transport failure.
    Error(TransportError),
}

impl CloseReason {
    /// Whether this closure was forced from above rather than organic.
    #[must_use]
    pub fn is_forced(&self) -> bool { matches!(self, Self::Cancelled) }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => f.write_str("closed explicitly"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Receiver side of a low-level channel's close notification.
///
/// Holds `None` while the channel is open and the triggering reason once it
/// closes.
pub type CloseNotifier = watch::Receiver<Option<CloseReason>>;

/// A low-level protocol channel.
///
/// Implementations must be cancellation-safe: dropping a pending RPC future
/// must not leave the channel in an inconsistent state.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Channel number on the connection.
    fn number(&self) -> u16;

    /// Perform the channel open handshake.
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the channel has closed.
    fn is_closed(&self) -> bool;

    /// Subscribe to the channel's close notification.
    fn closed(&self) -> CloseNotifier;

    async fn exchange_declare(
        &self,
        args: &ExchangeDeclare,
    ) -> Result<ExchangeDeclareOk, TransportError>;

    async fn exchange_delete(
        &self,
        args: &ExchangeDelete,
    ) -> Result<ExchangeDeleteOk, TransportError>;

    async fn exchange_bind(&self, args: &ExchangeBind) -> Result<BindOk, TransportError>;

    async fn exchange_unbind(&self, args: &ExchangeBind) -> Result<UnbindOk, TransportError>;

    async fn queue_declare(&self, args: &QueueDeclare) -> Result<QueueDeclareOk, TransportError>;

    async fn queue_delete(&self, args: &QueueDelete) -> Result<QueueDeleteOk, TransportError>;

    async fn queue_bind(&self, args: &QueueBind) -> Result<BindOk, TransportError>;

    async fn queue_unbind(&self, args: &QueueBind) -> Result<UnbindOk, TransportError>;

    async fn basic_qos(&self, qos: &Qos) -> Result<QosOk, TransportError>;
}

/// Connection from which channels are derived.
///
/// The connection owns the reconnect loop; the recovery layer only waits on
/// [`ready`](Connection::ready) and asks for fresh low-level channels.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Suspend until the connection-level transport is usable.
    async fn ready(&self);

    /// Create an unopened low-level channel, using `number` if given.
    async fn channel(&self, number: Option<u16>) -> Result<Arc<dyn Transport>, TransportError>;
}
