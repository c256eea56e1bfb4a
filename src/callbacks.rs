//! Broadcast registry of owner-scoped subscribers.
//!
//! A [`CallbackCollection`] fans a single event out to every registered
//! subscriber. Subscribers receive the collection's owner (if it is still
//! alive) and a borrowed payload. They may finish synchronously or hand back
//! an asynchronous continuation; continuations are spawned straight away and
//! gathered by the returned [`Broadcast`].
//!
//! A failing or panicking subscriber is logged and skipped, so one broken
//! listener never prevents the others from running. Membership can be held
//! strongly or weakly, and the whole collection can be frozen to reject
//! further mutation.

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    ptr,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use log::{error, warn};
use tokio::{runtime::Handle, task::JoinError};

use crate::{
    error::{BoxError, CallbackError, CallbackPanicked},
    metrics::{self, FailureKind},
};

/// Asynchronous continuation returned by a subscriber.
pub type CallbackFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Outcomes gathered from every asynchronous continuation of a broadcast.
pub type BroadcastResults = Vec<Result<(), BoxError>>;

/// Result of invoking a single subscriber.
pub enum Completion {
    /// The subscriber finished synchronously.
    Done,
    /// The subscriber scheduled further asynchronous work.
    Pending(CallbackFuture),
}

impl Completion {
    /// Wrap `fut` as a pending continuation.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::Pending(Box::pin(fut))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Pending(_) => f.write_str("Pending(<future>)"),
        }
    }
}

/// Signature shared by every subscriber of a collection owned by `O` and
/// carrying payload `A`.
pub type CallbackFn<O, A> =
    dyn Fn(Option<Arc<O>>, &A) -> Result<Completion, BoxError> + Send + Sync;

/// Shared handle to a subscriber. Identity is the handle's allocation, so
/// the same `Callback` must be passed to [`CallbackCollection::discard`].
pub type Callback<O, A> = Arc<CallbackFn<O, A>>;

/// Build a subscriber from a closure returning a [`Completion`].
pub fn callback<O, A, F>(f: F) -> Callback<O, A>
where
    F: Fn(Option<Arc<O>>, &A) -> Result<Completion, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build a subscriber that always completes synchronously.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicUsize, Ordering},
/// };
///
/// use amqp_robust::callbacks::{CallbackCollection, sync_callback};
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let seen = hits.clone();
/// let collection = CallbackCollection::<(), u32>::detached();
/// collection
///     .add(sync_callback(move |_owner, value: &u32| {
///         seen.fetch_add(*value as usize, Ordering::SeqCst);
///     }))
///     .expect("collection is not frozen");
///
/// let broadcast = collection.call(&3);
/// assert!(broadcast.is_ready());
/// assert_eq!(hits.load(Ordering::SeqCst), 3);
/// ```
pub fn sync_callback<O, A, F>(f: F) -> Callback<O, A>
where
    O: 'static,
    A: 'static,
    F: Fn(Option<Arc<O>>, &A) + Send + Sync + 'static,
{
    Arc::new(move |owner: Option<Arc<O>>, args: &A| {
        f(owner, args);
        Ok(Completion::Done)
    })
}

/// Build a subscriber whose work continues asynchronously.
///
/// The closure runs synchronously during [`CallbackCollection::call`] and
/// must not borrow the payload in the future it returns.
pub fn async_callback<O, A, F, Fut>(f: F) -> Callback<O, A>
where
    O: 'static,
    A: 'static,
    F: Fn(Option<Arc<O>>, &A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |owner: Option<Arc<O>>, args: &A| {
        Ok(Completion::pending(f(owner, args)))
    })
}

struct Members<O, A> {
    strong: Vec<Callback<O, A>>,
    weak: Vec<Weak<CallbackFn<O, A>>>,
    frozen: bool,
}

impl<O, A> Members<O, A> {
    fn empty() -> Self {
        Self {
            strong: Vec::new(),
            weak: Vec::new(),
            frozen: false,
        }
    }

    fn ensure_mutable(&self) -> Result<(), CallbackError> {
        if self.frozen {
            Err(CallbackError::Frozen)
        } else {
            Ok(())
        }
    }

    fn prune(&mut self) { self.weak.retain(|weak| weak.strong_count() > 0); }

    fn strong_position(&self, callback: &Callback<O, A>) -> Option<usize> {
        self.strong
            .iter()
            .position(|held| ptr::addr_eq(Arc::as_ptr(held), Arc::as_ptr(callback)))
    }

    fn weak_position(&self, callback: &Callback<O, A>) -> Option<usize> {
        self.weak
            .iter()
            .position(|held| ptr::addr_eq(held.as_ptr(), Arc::as_ptr(callback)))
    }

    fn live(&self) -> Vec<Callback<O, A>> {
        self.strong
            .iter()
            .cloned()
            .chain(self.weak.iter().filter_map(Weak::upgrade))
            .collect()
    }
}

impl<O, A> Clone for Members<O, A> {
    fn clone(&self) -> Self {
        Self {
            strong: self.strong.clone(),
            weak: self.weak.clone(),
            frozen: self.frozen,
        }
    }
}

/// Concurrency-safe set of subscribers notified together.
pub struct CallbackCollection<O, A> {
    owner: Weak<O>,
    members: Mutex<Members<O, A>>,
}

impl<O, A> CallbackCollection<O, A>
where
    O: Send + Sync + 'static,
    A: 'static,
{
    /// Create an empty collection whose subscribers receive `owner`.
    #[must_use]
    pub fn new(owner: Weak<O>) -> Self {
        Self {
            owner,
            members: Mutex::new(Members::empty()),
        }
    }

    /// Create a collection that starts with `subscribers` held strongly.
    #[must_use]
    pub fn with_subscribers<I>(owner: Weak<O>, subscribers: I) -> Self
    where
        I: IntoIterator<Item = Callback<O, A>>,
    {
        let collection = Self::new(owner);
        {
            let mut members = collection.lock();
            for subscriber in subscribers {
                if members.strong_position(&subscriber).is_none() {
                    members.strong.push(subscriber);
                }
            }
        }
        collection
    }

    /// Create a collection without an owner; subscribers receive `None`.
    #[must_use]
    pub fn detached() -> Self { Self::new(Weak::new()) }

    fn lock(&self) -> MutexGuard<'_, Members<O, A>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback`, keeping it alive for the collection's lifetime.
    ///
    /// Adding a subscriber that is already held strongly is a no-op.
    ///
    /// # Errors
    /// Returns [`CallbackError::Frozen`] if the collection is frozen.
    pub fn add(&self, callback: Callback<O, A>) -> Result<(), CallbackError> {
        let mut members = self.lock();
        members.ensure_mutable()?;
        if members.strong_position(&callback).is_none() {
            members.strong.push(callback);
        }
        Ok(())
    }

    /// Register `callback` without keeping it alive.
    ///
    /// Once every other handle to the subscriber is dropped it silently
    /// leaves the collection.
    ///
    /// # Errors
    /// Returns [`CallbackError::Frozen`] if the collection is frozen.
    pub fn add_weak(&self, callback: &Callback<O, A>) -> Result<(), CallbackError> {
        let mut members = self.lock();
        members.ensure_mutable()?;
        members.prune();
        if members.weak_position(callback).is_none() {
            members.weak.push(Arc::downgrade(callback));
        }
        Ok(())
    }

    /// Remove `callback`, looking at strong membership first.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    /// Returns [`CallbackError::Frozen`] if the collection is frozen.
    pub fn discard(&self, callback: &Callback<O, A>) -> Result<bool, CallbackError> {
        let mut members = self.lock();
        members.ensure_mutable()?;
        if let Some(index) = members.strong_position(callback) {
            members.strong.remove(index);
            return Ok(true);
        }
        if let Some(index) = members.weak_position(callback) {
            members.weak.remove(index);
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove every subscriber.
    ///
    /// # Errors
    /// Returns [`CallbackError::Frozen`] if the collection is frozen.
    pub fn clear(&self) -> Result<(), CallbackError> {
        let mut members = self.lock();
        members.ensure_mutable()?;
        members.strong.clear();
        members.weak.clear();
        Ok(())
    }

    /// Reject further mutation until [`unfreeze`](Self::unfreeze) is called.
    pub fn freeze(&self) { self.lock().frozen = true; }

    /// Accept mutation again.
    pub fn unfreeze(&self) { self.lock().frozen = false; }

    /// Whether the collection currently rejects mutation.
    #[must_use]
    pub fn is_frozen(&self) -> bool { self.lock().frozen }

    /// Whether `callback` is a live member, strongly or weakly.
    #[must_use]
    pub fn contains(&self, callback: &Callback<O, A>) -> bool {
        let members = self.lock();
        members.strong_position(callback).is_some()
            || members
                .weak_position(callback)
                .is_some_and(|index| members.weak[index].strong_count() > 0)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut members = self.lock();
        members.prune();
        members.strong.len() + members.weak.len()
    }

    /// Whether there are no live subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Snapshot the live subscribers, strong members first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Callback<O, A>> { self.lock().live() }

    /// Invoke every subscriber with the owner and `args`.
    ///
    /// Membership is snapshotted before any subscriber runs, so subscribers
    /// may mutate the collection. Subscriber errors and panics are logged and
    /// skipped. Asynchronous continuations are spawned on the current Tokio
    /// runtime if there is one; otherwise they are driven by the returned
    /// [`Broadcast`].
    pub fn call(&self, args: &A) -> Broadcast {
        let owner = self.owner.upgrade();
        let mut pending = Vec::new();
        for subscriber in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber(owner.clone(), args)));
            match outcome {
                Ok(Ok(Completion::Done)) => {}
                Ok(Ok(Completion::Pending(fut))) => pending.push(fut),
                Ok(Err(e)) => {
                    metrics::inc_callback_failures(FailureKind::Error);
                    error!("callback error: error={e}");
                }
                Err(payload) => {
                    metrics::inc_callback_failures(FailureKind::Panic);
                    let panic_msg = panic_message(payload.as_ref());
                    // Emit via both `log` and `tracing` for tests that capture either.
                    error!("callback panicked: panic={panic_msg}");
                    tracing::error!(panic = %panic_msg, "callback panicked");
                }
            }
        }
        Broadcast::gather(pending)
    }
}

impl<O, A> Clone for CallbackCollection<O, A> {
    fn clone(&self) -> Self {
        let members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
        Self {
            owner: self.owner.clone(),
            members: Mutex::new(members.clone()),
        }
    }
}

impl<O, A> fmt::Debug for CallbackCollection<O, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CallbackCollection")
            .field("strong", &members.strong.len())
            .field("weak", &members.weak.len())
            .field("frozen", &members.frozen)
            .finish_non_exhaustive()
    }
}

/// Aggregate completion of a broadcast.
///
/// Resolves once every asynchronous continuation has finished, yielding each
/// continuation's outcome. Failures are captured in the output and never
/// make the broadcast itself fail. When no subscriber produced a
/// continuation the broadcast is ready immediately and holds no allocation.
pub struct Broadcast(Option<BoxFuture<'static, BroadcastResults>>);

impl Broadcast {
    fn gather(pending: Vec<CallbackFuture>) -> Self {
        if pending.is_empty() {
            return Self(None);
        }
        let gathered: BoxFuture<'static, BroadcastResults> = match Handle::try_current() {
            Ok(handle) => {
                let tasks: Vec<_> = pending.into_iter().map(|fut| handle.spawn(fut)).collect();
                Box::pin(async move {
                    join_all(tasks)
                        .await
                        .into_iter()
                        .map(settle_joined)
                        .collect()
                })
            }
            Err(_) => Box::pin(async move {
                let caught = pending
                    .into_iter()
                    .map(|fut| AssertUnwindSafe(fut).catch_unwind());
                join_all(caught)
                    .await
                    .into_iter()
                    .map(|outcome| {
                        settle(outcome.unwrap_or_else(|payload| {
                            Err(Box::new(CallbackPanicked(panic_message(payload.as_ref()))))
                        }))
                    })
                    .collect()
            }),
        };
        Self(Some(gathered))
    }

    /// Whether the broadcast has nothing left to wait for.
    #[must_use]
    pub fn is_ready(&self) -> bool { self.0.is_none() }
}

impl Future for Broadcast {
    type Output = BroadcastResults;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.as_mut() {
            None => Poll::Ready(Vec::new()),
            Some(gathered) => gathered.as_mut().poll(cx),
        }
    }
}

impl fmt::Debug for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn settle_joined(joined: Result<Result<(), BoxError>, JoinError>) -> Result<(), BoxError> {
    match joined {
        Ok(outcome) => settle(outcome),
        Err(e) if e.is_panic() => {
            let panic_msg = panic_message(e.into_panic().as_ref());
            settle(Err(Box::new(CallbackPanicked(panic_msg))))
        }
        Err(e) => settle(Err(Box::new(e))),
    }
}

fn settle(outcome: Result<(), BoxError>) -> Result<(), BoxError> {
    if let Err(e) = &outcome {
        metrics::inc_callback_failures(FailureKind::Error);
        warn!("callback continuation failed: error={e}");
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

#[cfg(test)]
mod tests;
