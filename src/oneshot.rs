//! Run an asynchronous action at most once.
//!
//! [`OneShot`] collapses any number of concurrent invocations into a single
//! execution of its action. Every caller, including those arriving after
//! completion, observes the same outcome.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::OneShotError;

type Action<T> = Box<dyn FnOnce() -> BoxFuture<'static, T> + Send>;

struct Shared<T> {
    outcome: OnceLock<T>,
    finished: watch::Sender<bool>,
}

/// Marks the guard finished when dropped, whether the action returned,
/// panicked, or was cancelled mid-flight.
struct FinishOnDrop<T>(Arc<Shared<T>>);

impl<T> Drop for FinishOnDrop<T> {
    fn drop(&mut self) { self.0.finished.send_replace(true); }
}

/// Guard ensuring a wrapped asynchronous action executes at most once.
///
/// The first call spawns the action as its own task, so dropping that
/// caller does not interrupt it.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicUsize, Ordering},
/// };
///
/// use amqp_robust::oneshot::OneShot;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let runs = Arc::new(AtomicUsize::new(0));
/// let counter = runs.clone();
/// let guard = OneShot::new(move || async move { counter.fetch_add(1, Ordering::SeqCst) + 1 });
///
/// let (a, b) = tokio::join!(guard.call(), guard.call());
/// assert_eq!(a, Ok(1));
/// assert_eq!(b, Ok(1));
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// # }
/// ```
pub struct OneShot<T> {
    action: Mutex<Option<Action<T>>>,
    shared: Arc<Shared<T>>,
}

impl<T> OneShot<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `action` so that it runs at most once.
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let action: Action<T> = Box::new(move || Box::pin(action()));
        Self {
            action: Mutex::new(Some(action)),
            shared: Arc::new(Shared {
                outcome: OnceLock::new(),
                finished: watch::Sender::new(false),
            }),
        }
    }

    /// Start the action if it has not started yet and return its outcome.
    ///
    /// The first caller spawns the action on the current Tokio runtime;
    /// every caller then waits for that task and reuses its outcome.
    ///
    /// # Errors
    /// Returns [`OneShotError::Abandoned`] if the action panicked or its
    /// task was cancelled before producing an outcome.
    ///
    /// # Panics
    /// The first call panics when made outside a Tokio runtime.
    pub async fn call(&self) -> Result<T, OneShotError> {
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            let finish = FinishOnDrop(self.shared.clone());
            tokio::spawn(async move {
                let value = action().await;
                let _ = finish.0.outcome.set(value);
            });
        }
        self.wait().await;
        self.shared.outcome.get().cloned().ok_or(OneShotError::Abandoned)
    }

    /// Suspend until the action has finished.
    ///
    /// Returns immediately if it already has; never starts the action.
    pub async fn wait(&self) {
        let mut finished = self.shared.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Whether the action has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool { *self.shared.finished.borrow() }

    /// The recorded outcome, if the action completed.
    #[must_use]
    pub fn outcome(&self) -> Option<&T> { self.shared.outcome.get() }
}

impl<T> fmt::Debug for OneShot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShot")
            .field("finished", &*self.shared.finished.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
