//! Exchanges and queues that re-declare themselves after recovery.
//!
//! Entities hold only a weak reference back to their channel; the channel
//! in turn tracks them weakly in its registries. Dropping every handle to an
//! entity is therefore enough to stop it being restored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use log::debug;

use crate::{
    channel::RobustChannel,
    error::ChannelError,
    options::{ExchangeDeleteOptions, ExchangeOptions, QueueDeleteOptions, QueueOptions},
    transport::{
        BindOk,
        ExchangeBind,
        ExchangeDeleteOk,
        FieldTable,
        QueueBind,
        QueueDeleteOk,
        UnbindOk,
    },
};

/// Something that can re-establish its server-side state on a freshly
/// opened channel.
///
/// `restore` must be idempotent and must not depend on any state left over
/// from the previous low-level channel.
#[async_trait]
pub trait Restorable: Send + Sync {
    /// Name the entity is registered under.
    fn name(&self) -> &str;

    /// Re-declare the entity and everything recorded against it.
    async fn restore(&self) -> Result<(), ChannelError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record `binding` unless an equivalent one is already present.
fn remember<B: PartialEq>(bindings: &Mutex<Vec<B>>, binding: B) {
    let mut held = lock(bindings);
    if !held.contains(&binding) {
        held.push(binding);
    }
}

fn forget<B: PartialEq>(bindings: &Mutex<Vec<B>>, binding: &B) {
    lock(bindings).retain(|held| held != binding);
}

/// Exchange declared through a [`RobustChannel`].
pub struct RobustExchange {
    channel: RwLock<Weak<RobustChannel>>,
    name: String,
    options: ExchangeOptions,
    bindings: Mutex<Vec<ExchangeBind>>,
}

impl RobustExchange {
    pub(crate) fn new(channel: Weak<RobustChannel>, name: &str, options: ExchangeOptions) -> Self {
        Self {
            channel: RwLock::new(channel),
            name: name.to_owned(),
            options,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Name the exchange was declared under.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Options the exchange was declared with.
    #[must_use]
    pub fn options(&self) -> &ExchangeOptions { &self.options }

    /// Channel the exchange belongs to.
    ///
    /// # Errors
    /// Returns [`ChannelError::ChannelGone`] once the channel has been dropped.
    pub fn channel(&self) -> Result<Arc<RobustChannel>, ChannelError> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
            .ok_or(ChannelError::ChannelGone)
    }

    pub(crate) fn rebind(&self, channel: Weak<RobustChannel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    /// Exchange-to-exchange bindings replayed on restore.
    #[must_use]
    pub fn bindings(&self) -> Vec<ExchangeBind> { lock(&self.bindings).clone() }

    /// Bind this exchange to `source` and remember the binding for recovery.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn bind(
        &self,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<BindOk, ChannelError> {
        let channel = self.channel()?;
        channel.ready().await?;
        let args = ExchangeBind {
            destination: self.name.clone(),
            source: source.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments,
        };
        let ok = channel.rpc(channel.underlay()?.exchange_bind(&args)).await?;
        remember(&self.bindings, args);
        Ok(ok)
    }

    /// Remove a binding created by [`bind`](Self::bind).
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn unbind(
        &self,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<UnbindOk, ChannelError> {
        let channel = self.channel()?;
        channel.ready().await?;
        let args = ExchangeBind {
            destination: self.name.clone(),
            source: source.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments,
        };
        let ok = channel.rpc(channel.underlay()?.exchange_unbind(&args)).await?;
        forget(&self.bindings, &args);
        Ok(ok)
    }

    /// Delete the exchange through its channel, ending its recovery.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn delete(
        &self,
        options: ExchangeDeleteOptions,
    ) -> Result<ExchangeDeleteOk, ChannelError> {
        self.channel()?.exchange_delete(&self.name, options).await
    }
}

impl std::fmt::Debug for RobustExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustExchange")
            .field("name", &self.name)
            .field("kind", &self.options.kind)
            .field("bindings", &lock(&self.bindings).len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Restorable for RobustExchange {
    fn name(&self) -> &str { &self.name }

    async fn restore(&self) -> Result<(), ChannelError> {
        let channel = self.channel()?;
        let transport = channel.underlay()?;
        debug!("restoring exchange: name={:?}, kind={}", self.name, self.options.kind);
        channel
            .rpc(transport.exchange_declare(&self.options.declare(&self.name)))
            .await?;
        for binding in self.bindings() {
            channel.rpc(transport.exchange_bind(&binding)).await?;
        }
        Ok(())
    }
}

/// Queue declared through a [`RobustChannel`].
pub struct RobustQueue {
    channel: Weak<RobustChannel>,
    name: String,
    options: QueueOptions,
    bindings: Mutex<Vec<QueueBind>>,
}

impl RobustQueue {
    pub(crate) fn new(channel: Weak<RobustChannel>, name: &str, options: QueueOptions) -> Self {
        Self {
            channel,
            name: name.to_owned(),
            options,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Name the queue was declared under.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Options the queue was declared with.
    #[must_use]
    pub fn options(&self) -> &QueueOptions { &self.options }

    /// Channel the queue belongs to.
    ///
    /// # Errors
    /// Returns [`ChannelError::ChannelGone`] once the channel has been dropped.
    pub fn channel(&self) -> Result<Arc<RobustChannel>, ChannelError> {
        self.channel.upgrade().ok_or(ChannelError::ChannelGone)
    }

    /// Bindings replayed on restore.
    #[must_use]
    pub fn bindings(&self) -> Vec<QueueBind> { lock(&self.bindings).clone() }

    /// Bind the queue to `exchange` and remember the binding for recovery.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn bind(
        &self,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<BindOk, ChannelError> {
        let channel = self.channel()?;
        channel.ready().await?;
        let args = QueueBind {
            queue: self.name.clone(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments,
        };
        let ok = channel.rpc(channel.underlay()?.queue_bind(&args)).await?;
        remember(&self.bindings, args);
        Ok(ok)
    }

    /// Remove a binding created by [`bind`](Self::bind).
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn unbind(
        &self,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<UnbindOk, ChannelError> {
        let channel = self.channel()?;
        channel.ready().await?;
        let args = QueueBind {
            queue: self.name.clone(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments,
        };
        let ok = channel.rpc(channel.underlay()?.queue_unbind(&args)).await?;
        forget(&self.bindings, &args);
        Ok(ok)
    }

    /// Delete the queue through its channel, ending its recovery.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is gone, closed, or the RPC
    /// fails.
    pub async fn delete(&self, options: QueueDeleteOptions) -> Result<QueueDeleteOk, ChannelError> {
        self.channel()?.queue_delete(&self.name, options).await
    }
}

impl std::fmt::Debug for RobustQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustQueue")
            .field("name", &self.name)
            .field("robust", &self.options.robust)
            .field("bindings", &lock(&self.bindings).len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Restorable for RobustQueue {
    fn name(&self) -> &str { &self.name }

    async fn restore(&self) -> Result<(), ChannelError> {
        let channel = self.channel()?;
        let transport = channel.underlay()?;
        debug!("restoring queue: name={:?}, bindings={}", self.name, lock(&self.bindings).len());
        channel
            .rpc(transport.queue_declare(&self.options.declare(&self.name)))
            .await?;
        for binding in self.bindings() {
            channel.rpc(transport.queue_bind(&binding)).await?;
        }
        Ok(())
    }
}
