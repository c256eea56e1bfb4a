//! Channel that survives loss of its low-level transport.
//!
//! A [`RobustChannel`] wraps whichever low-level channel its [`Connection`]
//! currently hands out. When that channel closes for any reason other than a
//! forced cancellation, the robust channel clears its readiness signals,
//! blocks new operations, and restores itself on a fresh low-level channel:
//! QoS first, then every tracked exchange, then every tracked queue. Only
//! then are waiters on [`RobustChannel::ready`] released.

mod state;

use std::{
    future::Future,
    ptr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        OnceLock,
        PoisonError,
        Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info, warn};
pub use state::ChannelState;
use tokio::{sync::watch, time::timeout};

use crate::{
    callbacks::{CallbackCollection, async_callback},
    config::ChannelConfig,
    entity::{Restorable, RobustExchange, RobustQueue},
    error::{ChannelError, TransportError},
    metrics,
    oneshot::OneShot,
    options::{ExchangeDeleteOptions, ExchangeOptions, QosOptions, QueueDeleteOptions, QueueOptions},
    registry::EntityRegistry,
    transport::{CloseReason, Connection, ExchangeDeleteOk, Qos, QueueDeleteOk, Transport},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Logical channel that re-creates itself and its entities after transport
/// loss.
///
/// Construct with [`RobustChannel::new`] and call [`open`](Self::open) once.
/// Every declare and delete operation waits on [`ready`](Self::ready), so
/// callers never observe a half-restored channel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use amqp_robust::{
///     ChannelState,
///     RobustChannel,
///     config::ChannelConfig,
///     memory::MemoryBroker,
///     options::{ExchangeOptions, QueueOptions},
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), amqp_robust::ChannelError> {
/// let broker = Arc::new(MemoryBroker::new());
/// let channel = RobustChannel::new(broker.clone(), ChannelConfig::default());
/// channel.open().await?;
///
/// let logs = channel.declare_exchange("logs", ExchangeOptions::default()).await?;
/// let queue = channel.declare_queue("audit", QueueOptions::default()).await?;
/// queue.bind("logs", "#", Default::default()).await?;
///
/// let mut states = channel.state_changes();
/// broker.disconnect();
/// states
///     .wait_for(|state| *state == ChannelState::Restoring)
///     .await
///     .expect("channel is alive");
/// broker.reconnect();
/// channel.ready().await?;
/// assert!(channel.state().is_ready());
/// # drop(logs);
/// # Ok(())
/// # }
/// ```
pub struct RobustChannel {
    me: Weak<Self>,
    connection: Arc<dyn Connection>,
    config: ChannelConfig,
    underlay: Mutex<Option<Arc<dyn Transport>>>,
    state: watch::Sender<ChannelState>,
    ready: watch::Sender<bool>,
    restored: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    qos: Mutex<Qos>,
    exchanges: EntityRegistry<RobustExchange>,
    queues: EntityRegistry<RobustQueue>,
    default_exchange: OnceLock<Arc<RobustExchange>>,
    initialized: AtomicBool,
    restore_lock: tokio::sync::Mutex<()>,
    reopen_callbacks: CallbackCollection<RobustChannel, ()>,
    close_callbacks: CallbackCollection<RobustChannel, CloseReason>,
    closer: OneShot<Result<(), ChannelError>>,
}

impl RobustChannel {
    /// Create a closed channel bound to `connection`.
    #[must_use]
    pub fn new(connection: Arc<dyn Connection>, config: ChannelConfig) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let on_close = async_callback(
                |owner: Option<Arc<RobustChannel>>, reason: &CloseReason| {
                    let reason = reason.clone();
                    async move {
                        if let Some(channel) = owner {
                            channel.handle_close(reason).await?;
                        }
                        Ok(())
                    }
                },
            );
            let closer = {
                let me = me.clone();
                OneShot::new(move || async move {
                    match me.upgrade() {
                        Some(channel) => channel.shutdown().await,
                        None => Ok(()),
                    }
                })
            };
            Self {
                me: me.clone(),
                connection,
                config: config.normalized(),
                underlay: Mutex::new(None),
                state: watch::Sender::new(ChannelState::Closed),
                ready: watch::Sender::new(false),
                restored: watch::Sender::new(true),
                closed: watch::Sender::new(false),
                qos: Mutex::new(Qos::default()),
                exchanges: EntityRegistry::default(),
                queues: EntityRegistry::default(),
                default_exchange: OnceLock::new(),
                initialized: AtomicBool::new(false),
                restore_lock: tokio::sync::Mutex::new(()),
                reopen_callbacks: CallbackCollection::new(me.clone()),
                close_callbacks: CallbackCollection::with_subscribers(me.clone(), [on_close]),
                closer,
            }
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState { *self.state.borrow() }

    /// Subscribe to lifecycle transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> { self.state.subscribe() }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig { &self.config }

    /// Number of the current low-level channel, if one is installed.
    #[must_use]
    pub fn number(&self) -> Option<u16> { lock(&self.underlay).as_ref().map(|t| t.number()) }

    /// Whether the channel was closed explicitly.
    #[must_use]
    pub fn is_closed(&self) -> bool { *self.closed.borrow() }

    /// QoS baseline applied on every open.
    #[must_use]
    pub fn qos(&self) -> Qos { *lock(&self.qos) }

    /// Subscribers notified after every successful low-level open, before
    /// entities are restored.
    ///
    /// Subscribers run while the channel is not yet ready; awaiting
    /// [`ready`](Self::ready) or [`restore`](Self::restore) from their
    /// continuation deadlocks.
    #[must_use]
    pub fn reopen_callbacks(&self) -> &CallbackCollection<RobustChannel, ()> {
        &self.reopen_callbacks
    }

    /// Subscribers notified whenever the low-level channel closes.
    ///
    /// The collection starts with the channel's own recovery handler.
    #[must_use]
    pub fn close_callbacks(&self) -> &CallbackCollection<RobustChannel, CloseReason> {
        &self.close_callbacks
    }

    /// The server's default exchange, available after the first open.
    #[must_use]
    pub fn default_exchange(&self) -> Option<Arc<RobustExchange>> {
        self.default_exchange.get().cloned()
    }

    /// Live exchanges that will be re-declared on the next restore, in
    /// declaration order.
    #[must_use]
    pub fn tracked_exchanges(&self) -> Vec<Arc<RobustExchange>> { self.exchanges.snapshot() }

    /// Live queues that will be re-declared on the next restore, in
    /// declaration order.
    #[must_use]
    pub fn tracked_queues(&self) -> Vec<Arc<RobustQueue>> { self.queues.snapshot() }

    /// Open the channel for the first time.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] after an explicit close,
    /// [`ChannelError::InvalidState`] if the channel is not closed, or the
    /// error that interrupted the open sequence.
    pub async fn open(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let _guard = self.restore_lock.lock().await;
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Closed {
                *state = ChannelState::Opening;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(ChannelError::InvalidState {
                operation: "open",
                state,
            });
        }
        match self.open_sequence().await {
            Ok(()) => {
                self.state.send_replace(ChannelState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("channel open failed: error={e}");
                self.state.send_replace(ChannelState::Closed);
                Err(e)
            }
        }
    }

    /// Wait until the connection is usable and the channel is opened and
    /// fully restored.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] if the channel is, or becomes,
    /// explicitly closed, and [`ChannelError::NotOpen`] while it is in the
    /// [`Closed`](ChannelState::Closed) state for any other reason: never
    /// opened, failed to open, or torn down by a forced close.
    pub async fn ready(&self) -> Result<(), ChannelError> {
        self.connection.ready().await;
        let mut ready = self.ready.subscribe();
        let mut restored = self.restored.subscribe();
        let mut closed = self.closed.subscribe();
        let mut state = self.state.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(ChannelError::Closed);
            }
            if *state.borrow_and_update() == ChannelState::Closed {
                return Err(ChannelError::NotOpen);
            }
            if *ready.borrow_and_update() && *restored.borrow_and_update() {
                return Ok(());
            }
            // Senders live in `self`; `changed` cannot fail while we wait.
            tokio::select! {
                _ = ready.changed() => {}
                _ = restored.changed() => {}
                _ = closed.changed() => {}
                _ = state.changed() => {}
            }
        }
    }

    /// Re-open the channel and re-declare its entities after a loss.
    ///
    /// Concurrent calls are serialized; callers arriving after a completed
    /// restoration return immediately. Failures are returned unchanged so an
    /// external supervisor can retry.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] after an explicit close,
    /// [`ChannelError::InvalidState`] if the channel is not open (only
    /// [`open`](Self::open) leaves that state), or the error that interrupted
    /// the open sequence.
    pub async fn restore(&self) -> Result<(), ChannelError> {
        let _guard = self.restore_lock.lock().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let state = self.state();
        if state == ChannelState::Closed {
            return Err(ChannelError::InvalidState {
                operation: "restore",
                state,
            });
        }
        if *self.restored.borrow() {
            debug!("restore skipped, channel is current: channel={:?}", self.number());
            return Ok(());
        }
        info!("restoring channel: channel={:?}", self.number());
        match self.open_sequence().await {
            Ok(()) => {
                self.restored.send_replace(true);
                self.state.send_replace(ChannelState::Ready);
                metrics::inc_restores();
                info!("channel restored: channel={:?}", self.number());
                Ok(())
            }
            Err(e) => {
                metrics::inc_restore_failures();
                warn!("channel restore failed: channel={:?}, error={e}", self.number());
                Err(e)
            }
        }
    }

    /// Former form of [`restore`](Self::restore) taking a replacement
    /// low-level channel. The hint is ignored; a fresh channel is always
    /// requested from the connection.
    ///
    /// # Errors
    /// As [`restore`](Self::restore).
    #[deprecated(note = "call `restore` instead; the channel hint is ignored")]
    pub async fn restore_from(&self, hint: Option<Arc<dyn Transport>>) -> Result<(), ChannelError> {
        if let Some(hint) = hint {
            warn!("ignoring deprecated restore hint: hint={}", hint.number());
        }
        self.restore().await
    }

    /// Close the channel for good.
    ///
    /// Concurrent and repeated calls share a single close sequence and
    /// observe its outcome. No restoration follows an explicit close.
    ///
    /// # Errors
    /// Returns the error from closing the low-level channel, or
    /// [`ChannelError::Close`] if the close sequence was abandoned.
    pub async fn close(&self) -> Result<(), ChannelError> { self.closer.call().await? }

    /// Wait until an explicit close has finished.
    pub async fn closed(&self) { self.closer.wait().await; }

    /// Declare an exchange and track it for restoration.
    ///
    /// Exchanges declared with `robust(false)` or `internal(true)` are not
    /// tracked.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is closed or the RPC fails.
    pub async fn declare_exchange(
        &self,
        name: &str,
        options: ExchangeOptions,
    ) -> Result<Arc<RobustExchange>, ChannelError> {
        self.ready().await?;
        self.rpc(self.underlay()?.exchange_declare(&options.declare(name)))
            .await?;
        let exchange = Arc::new(RobustExchange::new(self.me.clone(), name, options));
        if exchange.options().is_tracked() {
            self.exchanges.insert(name, &exchange);
        }
        debug!(
            "exchange declared: name={name:?}, tracked={}",
            exchange.options().is_tracked()
        );
        Ok(exchange)
    }

    /// Declare a queue and track it for restoration.
    ///
    /// An empty name asks the peer to generate one; the generated name is
    /// used for tracking and re-declaration.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is closed or the RPC fails.
    pub async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<RobustQueue>, ChannelError> {
        self.ready().await?;
        let ok = self
            .rpc(self.underlay()?.queue_declare(&options.declare(name)))
            .await?;
        let queue = Arc::new(RobustQueue::new(self.me.clone(), &ok.queue, options));
        if queue.options().robust {
            self.queues.insert(&ok.queue, &queue);
        }
        debug!("queue declared: name={:?}, tracked={}", ok.queue, queue.options().robust);
        Ok(queue)
    }

    /// Delete an exchange and stop restoring it.
    ///
    /// The name leaves the registry even if the peer had nothing to delete.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is closed or the RPC fails.
    pub async fn exchange_delete(
        &self,
        name: &str,
        options: ExchangeDeleteOptions,
    ) -> Result<ExchangeDeleteOk, ChannelError> {
        self.ready().await?;
        let ok = self
            .rpc(self.underlay()?.exchange_delete(&options.delete(name)))
            .await?;
        let tracked = self.exchanges.remove(name);
        debug!("exchange deleted: name={name:?}, was_tracked={tracked}");
        Ok(ok)
    }

    /// Delete a queue and stop restoring it.
    ///
    /// The name leaves the registry even if the peer had nothing to delete.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is closed or the RPC fails.
    pub async fn queue_delete(
        &self,
        name: &str,
        options: QueueDeleteOptions,
    ) -> Result<QueueDeleteOk, ChannelError> {
        self.ready().await?;
        let ok = self
            .rpc(self.underlay()?.queue_delete(&options.delete(name)))
            .await?;
        let tracked = self.queues.remove(name);
        debug!("queue deleted: name={name:?}, was_tracked={tracked}");
        Ok(ok)
    }

    /// Record a new QoS baseline and apply it if the channel is open.
    ///
    /// Only waits for the connection, not for the channel: before the first
    /// open, or while restoring, the baseline is applied by the next open
    /// sequence.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if applying the QoS to a live channel fails.
    pub async fn set_qos(&self, options: QosOptions) -> Result<Qos, ChannelError> {
        let qos = options.resolve();
        self.connection.ready().await;
        *lock(&self.qos) = qos;
        let live = lock(&self.underlay)
            .clone()
            .filter(|transport| !transport.is_closed());
        match live {
            Some(transport) => {
                self.rpc(transport.basic_qos(&qos)).await?;
                debug!(
                    "qos applied: prefetch_count={}, prefetch_size={}, global={}",
                    qos.prefetch_count, qos.prefetch_size, qos.global
                );
            }
            None => debug!("qos recorded for next open: prefetch_count={}", qos.prefetch_count),
        }
        Ok(qos)
    }

    /// Current low-level channel.
    pub(crate) fn underlay(&self) -> Result<Arc<dyn Transport>, ChannelError> {
        lock(&self.underlay).clone().ok_or(ChannelError::NotOpen)
    }

    /// Await a transport RPC under the configured timeout.
    pub(crate) async fn rpc<T, F>(&self, fut: F) -> Result<T, ChannelError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match self.config.rpc_timeout {
            Some(limit) => Ok(timeout(limit, fut)
                .await
                .map_err(|_| ChannelError::Timeout(limit))??),
            None => Ok(fut.await?),
        }
    }

    fn is_current(&self, transport: &Weak<dyn Transport>) -> bool {
        lock(&self.underlay)
            .as_ref()
            .is_some_and(|current| ptr::addr_eq(Arc::as_ptr(current), transport.as_ptr()))
    }

    fn mark_ready(&self) {
        if !self.ready.send_replace(true) {
            metrics::inc_ready_channels();
        }
    }

    fn mark_not_ready(&self) {
        if self.ready.send_replace(false) {
            metrics::dec_ready_channels();
        }
    }

    /// Acquire and open a fresh low-level channel, then run the post-open
    /// sequence.
    async fn open_sequence(&self) -> Result<(), ChannelError> {
        self.connection.ready().await;
        let transport = self.connection.channel(self.config.channel_number).await?;
        self.rpc(transport.open()).await?;
        if self.is_closed() {
            if let Err(e) = transport.close().await {
                debug!(
                    "closing channel opened during close failed: channel={}, error={e}",
                    transport.number()
                );
            }
            return Err(ChannelError::Closed);
        }
        let number = transport.number();
        let previous = lock(&self.underlay).replace(transport.clone());
        if let Some(previous) = previous.filter(|p| !p.is_closed()) {
            if let Err(e) = previous.close().await {
                debug!("closing superseded channel failed: channel={}, error={e}", previous.number());
            }
        }
        self.watch_close(&transport);
        info!("channel opened: channel={number}");
        self.state.send_if_modified(|state| {
            let opening = *state == ChannelState::Opening;
            if opening {
                *state = ChannelState::OpenNotReady;
            }
            opening
        });
        // Subscriber failures are logged by the broadcast itself.
        self.reopen_callbacks.call(&()).await;
        self.on_open().await
    }

    /// Re-apply QoS, restore tracked entities, then mark the channel ready.
    async fn on_open(&self) -> Result<(), ChannelError> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            let _ = self.default_exchange.set(Arc::new(RobustExchange::new(
                self.me.clone(),
                "",
                ExchangeOptions::default(),
            )));
        }
        let exchanges = self.exchanges.snapshot();
        let queues = self.queues.snapshot();
        let transport = self.underlay()?;

        let qos = self.qos();
        self.rpc(transport.basic_qos(&qos)).await?;

        for exchange in exchanges {
            exchange.restore().await?;
        }
        for queue in queues {
            queue.restore().await?;
        }
        if let Some(default) = self.default_exchange.get() {
            default.rebind(self.me.clone());
        }
        self.mark_ready();
        Ok(())
    }

    fn watch_close(&self, transport: &Arc<dyn Transport>) {
        let mut notifier = transport.closed();
        let watched = Arc::downgrade(transport);
        let me = self.me.clone();
        tokio::spawn(async move {
            let reason = match notifier.wait_for(Option::is_some).await {
                Ok(reason) => reason.clone(),
                Err(_) => return,
            };
            let Some(reason) = reason else { return };
            let Some(channel) = me.upgrade() else { return };
            if !channel.is_current(&watched) {
                debug!("ignoring close of superseded channel: reason={reason}");
                return;
            }
            info!("channel closed by transport: channel={:?}, reason={reason}", channel.number());
            channel.close_callbacks.call(&reason).await;
        });
    }

    async fn handle_close(&self, reason: CloseReason) -> Result<(), ChannelError> {
        if reason.is_forced() {
            debug!("forced close, not restoring: channel={:?}", self.number());
            self.mark_not_ready();
            self.state.send_replace(ChannelState::Closed);
            return Ok(());
        }
        let state = self.state();
        if matches!(
            state,
            ChannelState::Closed | ChannelState::Opening | ChannelState::OpenNotReady
        ) {
            // A failing `open` reports the loss to its own caller.
            debug!("channel lost outside recovery: state={state}, reason={reason}");
            self.mark_not_ready();
            return Ok(());
        }
        let in_restore = !*self.restored.borrow();
        self.restored.send_replace(false);
        self.mark_not_ready();
        if self.is_closed() || in_restore {
            return Ok(());
        }
        self.state.send_replace(ChannelState::Restoring);
        warn!("channel lost, restoring: channel={:?}, reason={reason}", self.number());
        self.restore().await
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.closed.send_replace(true);
        self.mark_not_ready();
        self.state.send_replace(ChannelState::Closed);
        let transport = lock(&self.underlay).take();
        let result = match transport {
            Some(transport) if !transport.is_closed() => self.rpc(transport.close()).await,
            _ => Ok(()),
        };
        info!("channel closed explicitly: error={:?}", result.as_ref().err());
        self.close_callbacks.call(&CloseReason::Explicit).await;
        result
    }
}

impl std::fmt::Debug for RobustChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustChannel")
            .field("state", &self.state())
            .field("number", &self.number())
            .field("exchanges", &self.exchanges.len())
            .field("queues", &self.queues.len())
            .finish_non_exhaustive()
    }
}
