//! In-process broker implementing [`Connection`] and [`Transport`].
//!
//! [`MemoryBroker`] answers every RPC locally and records it in a journal,
//! which makes the order of re-declarations during recovery observable. It
//! can simulate connectivity loss, forced teardown, per-RPC failures, and
//! can hold an RPC in flight until a test releases it.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;

use crate::{
    error::TransportError,
    transport::{
        BindOk,
        CloseNotifier,
        CloseReason,
        Connection,
        ExchangeBind,
        ExchangeDeclare,
        ExchangeDeclareOk,
        ExchangeDelete,
        ExchangeDeleteOk,
        Qos,
        QosOk,
        QueueBind,
        QueueDeclare,
        QueueDeclareOk,
        QueueDelete,
        QueueDeleteOk,
        Transport,
        UnbindOk,
    },
};

/// Protocol method recorded in the journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Open,
    Close,
    Qos(Qos),
    ExchangeDeclare(String),
    ExchangeDelete(String),
    ExchangeBind { destination: String, source: String, routing_key: String },
    ExchangeUnbind { destination: String, source: String, routing_key: String },
    QueueDeclare(String),
    QueueDelete(String),
    QueueBind { queue: String, exchange: String, routing_key: String },
    QueueUnbind { queue: String, exchange: String, routing_key: String },
}

/// Discriminant of [`Method`], used to target failures and gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RpcKind {
    Open,
    Close,
    Qos,
    ExchangeDeclare,
    ExchangeDelete,
    ExchangeBind,
    ExchangeUnbind,
    QueueDeclare,
    QueueDelete,
    QueueBind,
    QueueUnbind,
}

impl Method {
    /// Kind of this method.
    #[must_use]
    pub fn kind(&self) -> RpcKind {
        match self {
            Self::Open => RpcKind::Open,
            Self::Close => RpcKind::Close,
            Self::Qos(_) => RpcKind::Qos,
            Self::ExchangeDeclare(_) => RpcKind::ExchangeDeclare,
            Self::ExchangeDelete(_) => RpcKind::ExchangeDelete,
            Self::ExchangeBind { .. } => RpcKind::ExchangeBind,
            Self::ExchangeUnbind { .. } => RpcKind::ExchangeUnbind,
            Self::QueueDeclare(_) => RpcKind::QueueDeclare,
            Self::QueueDelete(_) => RpcKind::QueueDelete,
            Self::QueueBind { .. } => RpcKind::QueueBind,
            Self::QueueUnbind { .. } => RpcKind::QueueUnbind,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("channel.open"),
            Self::Close => f.write_str("channel.close"),
            Self::Qos(qos) => write!(
                f,
                "basic.qos prefetch_count={} prefetch_size={} global={}",
                qos.prefetch_count, qos.prefetch_size, qos.global
            ),
            Self::ExchangeDeclare(name) => write!(f, "exchange.declare {name:?}"),
            Self::ExchangeDelete(name) => write!(f, "exchange.delete {name:?}"),
            Self::ExchangeBind { destination, source, routing_key } => {
                write!(f, "exchange.bind {destination:?} <- {source:?} key={routing_key:?}")
            }
            Self::ExchangeUnbind { destination, source, routing_key } => {
                write!(f, "exchange.unbind {destination:?} <- {source:?} key={routing_key:?}")
            }
            Self::QueueDeclare(name) => write!(f, "queue.declare {name:?}"),
            Self::QueueDelete(name) => write!(f, "queue.delete {name:?}"),
            Self::QueueBind { queue, exchange, routing_key } => {
                write!(f, "queue.bind {queue:?} <- {exchange:?} key={routing_key:?}")
            }
            Self::QueueUnbind { queue, exchange, routing_key } => {
                write!(f, "queue.unbind {queue:?} <- {exchange:?} key={routing_key:?}")
            }
        }
    }
}

/// Journal entry: a method accepted on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rpc {
    pub channel: u16,
    pub method: Method,
}

impl fmt::Display for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch={} {}", self.channel, self.method)
    }
}

struct GateState {
    kind: RpcKind,
    reached: watch::Sender<bool>,
    released: watch::Sender<bool>,
}

/// Holds the next RPC of one kind in flight until released.
///
/// Dropping the gate releases it.
pub struct RpcGate {
    state: Arc<GateState>,
}

impl RpcGate {
    /// Wait until an RPC is being held by this gate.
    pub async fn reached(&self) {
        let mut reached = self.state.reached.subscribe();
        let _ = reached.wait_for(|hit| *hit).await;
    }

    /// Whether an RPC has arrived at the gate.
    #[must_use]
    pub fn is_reached(&self) -> bool { *self.state.reached.borrow() }

    /// Let the held RPC proceed.
    pub fn release(&self) { self.state.released.send_replace(true); }
}

impl Drop for RpcGate {
    fn drop(&mut self) { self.release(); }
}

#[derive(Default)]
struct Inner {
    journal: Vec<Rpc>,
    channels: Vec<Weak<MemoryChannel>>,
    next_channel: u16,
    next_queue: u64,
    failures: VecDeque<(RpcKind, TransportError)>,
    gates: VecDeque<Arc<GateState>>,
}

struct Shared {
    online: watch::Sender<bool>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_channels(&self) -> Vec<Arc<MemoryChannel>> {
        let mut inner = self.lock();
        inner.channels.retain(|channel| channel.strong_count() > 0);
        inner.channels.iter().filter_map(Weak::upgrade).collect()
    }

    async fn dispatch(&self, channel: &MemoryChannel, method: Method) -> Result<(), TransportError> {
        let kind = method.kind();
        if channel.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let gate = {
            let mut inner = self.lock();
            let position = inner.gates.iter().position(|gate| gate.kind == kind);
            position.and_then(|index| inner.gates.remove(index))
        };
        if let Some(gate) = gate {
            gate.reached.send_replace(true);
            let mut released = gate.released.subscribe();
            let _ = released.wait_for(|done| *done).await;
        }
        if channel.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let mut inner = self.lock();
        if let Some(index) = inner.failures.iter().position(|(k, _)| *k == kind) {
            if let Some((_, error)) = inner.failures.remove(index) {
                debug!("injected failure: channel={}, method={method}, error={error}", channel.number);
                return Err(error);
            }
        }
        inner.journal.push(Rpc {
            channel: channel.number,
            method,
        });
        Ok(())
    }
}

/// In-process broker.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use amqp_robust::{
///     memory::{MemoryBroker, Method},
///     transport::Connection,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = Arc::new(MemoryBroker::new());
/// let channel = broker.channel(None).await.expect("broker is online");
/// channel.open().await.expect("open succeeds");
///
/// assert_eq!(broker.journal()[0].method, Method::Open);
/// # }
/// ```
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self { Self::new() }
}

impl MemoryBroker {
    /// Create an online broker with an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                online: watch::Sender::new(true),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Whether the simulated connection is usable.
    #[must_use]
    pub fn is_online(&self) -> bool { *self.shared.online.borrow() }

    /// Drop connectivity: go offline and close every channel with
    /// [`TransportError::ConnectionLost`].
    pub fn disconnect(&self) {
        self.shared.online.send_replace(false);
        for channel in self.shared.live_channels() {
            channel.shut(CloseReason::Error(TransportError::ConnectionLost));
        }
        debug!("memory broker disconnected");
    }

    /// Restore connectivity. Waiters on [`Connection::ready`] resume.
    pub fn reconnect(&self) {
        self.shared.online.send_replace(true);
        debug!("memory broker reconnected");
    }

    /// Tear every channel down from above with [`CloseReason::Cancelled`].
    pub fn force_close(&self) {
        for channel in self.shared.live_channels() {
            channel.shut(CloseReason::Cancelled);
        }
    }

    /// Close the live channels numbered `number` with `error`, as a peer
    /// would on a channel-level exception.
    pub fn close_channel(&self, number: u16, error: TransportError) {
        for channel in self.shared.live_channels() {
            if channel.number == number {
                channel.shut(CloseReason::Error(error.clone()));
            }
        }
    }

    /// Fail the next RPC of `kind` with `error` instead of recording it.
    pub fn fail_next(&self, kind: RpcKind, error: TransportError) {
        self.shared.lock().failures.push_back((kind, error));
    }

    /// Hold the next RPC of `kind` until the returned gate is released.
    #[must_use]
    pub fn gate(&self, kind: RpcKind) -> RpcGate {
        let state = Arc::new(GateState {
            kind,
            reached: watch::Sender::new(false),
            released: watch::Sender::new(false),
        });
        self.shared.lock().gates.push_back(state.clone());
        RpcGate { state }
    }

    /// Every RPC accepted so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<Rpc> { self.shared.lock().journal.clone() }

    /// Return the journal and start a new one.
    pub fn take_journal(&self) -> Vec<Rpc> { std::mem::take(&mut self.shared.lock().journal) }

    /// Number of channels that are currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.shared
            .live_channels()
            .iter()
            .filter(|channel| !channel.is_closed())
            .count()
    }
}

#[async_trait]
impl Connection for MemoryBroker {
    async fn ready(&self) {
        let mut online = self.shared.online.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = online.wait_for(|up| *up).await;
    }

    async fn channel(&self, number: Option<u16>) -> Result<Arc<dyn Transport>, TransportError> {
        if !self.is_online() {
            return Err(TransportError::ConnectionLost);
        }
        let mut inner = self.shared.lock();
        let number = number.unwrap_or_else(|| {
            inner.next_channel = inner.next_channel.wrapping_add(1).max(1);
            inner.next_channel
        });
        let channel = Arc::new(MemoryChannel {
            number,
            shared: self.shared.clone(),
            closed: watch::Sender::new(None),
        });
        inner.channels.push(Arc::downgrade(&channel));
        Ok(channel)
    }
}

/// Low-level channel handed out by [`MemoryBroker`].
pub struct MemoryChannel {
    number: u16,
    shared: Arc<Shared>,
    closed: watch::Sender<Option<CloseReason>>,
}

impl MemoryChannel {
    fn shut(&self, reason: CloseReason) {
        self.closed.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

#[async_trait]
impl Transport for MemoryChannel {
    fn number(&self) -> u16 { self.number }

    async fn open(&self) -> Result<(), TransportError> {
        self.shared.dispatch(self, Method::Open).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.dispatch(self, Method::Close).await?;
        self.shut(CloseReason::Explicit);
        Ok(())
    }

    fn is_closed(&self) -> bool { self.closed.borrow().is_some() }

    fn closed(&self) -> CloseNotifier { self.closed.subscribe() }

    async fn exchange_declare(
        &self,
        args: &ExchangeDeclare,
    ) -> Result<ExchangeDeclareOk, TransportError> {
        self.shared
            .dispatch(self, Method::ExchangeDeclare(args.name.clone()))
            .await?;
        Ok(ExchangeDeclareOk)
    }

    async fn exchange_delete(
        &self,
        args: &ExchangeDelete,
    ) -> Result<ExchangeDeleteOk, TransportError> {
        self.shared
            .dispatch(self, Method::ExchangeDelete(args.name.clone()))
            .await?;
        Ok(ExchangeDeleteOk)
    }

    async fn exchange_bind(&self, args: &ExchangeBind) -> Result<BindOk, TransportError> {
        let method = Method::ExchangeBind {
            destination: args.destination.clone(),
            source: args.source.clone(),
            routing_key: args.routing_key.clone(),
        };
        self.shared.dispatch(self, method).await?;
        Ok(BindOk)
    }

    async fn exchange_unbind(&self, args: &ExchangeBind) -> Result<UnbindOk, TransportError> {
        let method = Method::ExchangeUnbind {
            destination: args.destination.clone(),
            source: args.source.clone(),
            routing_key: args.routing_key.clone(),
        };
        self.shared.dispatch(self, method).await?;
        Ok(UnbindOk)
    }

    async fn queue_declare(&self, args: &QueueDeclare) -> Result<QueueDeclareOk, TransportError> {
        let queue = if args.name.is_empty() {
            let mut inner = self.shared.lock();
            inner.next_queue += 1;
            format!("amq.gen-{}", inner.next_queue)
        } else {
            args.name.clone()
        };
        self.shared
            .dispatch(self, Method::QueueDeclare(queue.clone()))
            .await?;
        Ok(QueueDeclareOk {
            queue,
            ..QueueDeclareOk::default()
        })
    }

    async fn queue_delete(&self, args: &QueueDelete) -> Result<QueueDeleteOk, TransportError> {
        self.shared
            .dispatch(self, Method::QueueDelete(args.name.clone()))
            .await?;
        Ok(QueueDeleteOk::default())
    }

    async fn queue_bind(&self, args: &QueueBind) -> Result<BindOk, TransportError> {
        let method = Method::QueueBind {
            queue: args.queue.clone(),
            exchange: args.exchange.clone(),
            routing_key: args.routing_key.clone(),
        };
        self.shared.dispatch(self, method).await?;
        Ok(BindOk)
    }

    async fn queue_unbind(&self, args: &QueueBind) -> Result<UnbindOk, TransportError> {
        let method = Method::QueueUnbind {
            queue: args.queue.clone(),
            exchange: args.exchange.clone(),
            routing_key: args.routing_key.clone(),
        };
        self.shared.dispatch(self, method).await?;
        Ok(UnbindOk)
    }

    async fn basic_qos(&self, qos: &Qos) -> Result<QosOk, TransportError> {
        self.shared.dispatch(self, Method::Qos(*qos)).await?;
        Ok(QosOk)
    }
}
