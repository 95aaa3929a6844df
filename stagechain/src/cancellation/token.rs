//! Cancellation token for cooperative cancellation.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// A callback type for cancellation notifications. Receives the reason.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct CancelState {
    reason: Option<String>,
    cancelled_at: Option<Instant>,
    next_id: u64,
    callbacks: Vec<(u64, CancelCallback)>,
}

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Tasks can poll [`is_cancelled`](Self::is_cancelled) or await
/// [`cancelled`](Self::cancelled) inside a `select!`.
#[derive(Default)]
pub struct CancellationToken {
    /// Fast-path flag, set once under the state lock.
    cancelled: AtomicBool,
    state: Mutex<CancelState>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Callbacks are invoked after the state lock is released. Panics in
    /// callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let (reason, callbacks) = {
            let mut state = self.state.lock();
            if state.reason.is_some() {
                return;
            }
            let reason = reason.into();
            state.reason = Some(reason.clone());
            state.cancelled_at = Some(Instant::now());
            self.cancelled.store(true, Ordering::SeqCst);
            (reason, std::mem::take(&mut state.callbacks))
        };

        self.notify.notify_waiters();

        for (_, callback) in &callbacks {
            invoke(callback.as_ref(), &reason);
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let _ = self.register(callback);
    }

    /// Stores `callback` and returns its id, or runs it at once if already cancelled.
    fn register<F>(&self, callback: F) -> Option<u64>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let reason = {
            let mut state = self.state.lock();
            match state.reason.clone() {
                Some(reason) => reason,
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.callbacks.push((id, Box::new(callback)));
                    return Some(id);
                }
            }
        };
        invoke(&callback, &reason);
        None
    }

    fn unregister(&self, id: u64) {
        self.state.lock().callbacks.retain(|(entry, _)| *entry != id);
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }

    /// Returns when cancellation was requested.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<Instant> {
        self.state.lock().cancelled_at
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flag so a concurrent
            // `cancel` cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Creates a token that is cancelled whenever this one is.
    ///
    /// Cancelling the child leaves the parent untouched. Dropping the
    /// returned handle unhooks the child from this token.
    #[must_use]
    pub fn child(&self) -> ChildToken<'_> {
        let token = Arc::new(Self::new());
        let weak = Arc::downgrade(&token);
        let registration = self.register(move |reason| {
            if let Some(child) = weak.upgrade() {
                child.cancel(reason);
            }
        });
        ChildToken {
            parent: self,
            token,
            registration,
        }
    }

    /// Cancels this token once `deadline` has elapsed.
    ///
    /// Abort the returned handle to disarm the timer.
    pub fn cancel_after(self: &Arc<Self>, deadline: Duration) -> JoinHandle<()> {
        let token = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(token) = token.upgrade() {
                token.cancel(format!("deadline of {}ms exceeded", deadline.as_millis()));
            }
        })
    }
}

/// A token linked to a parent for as long as this handle lives.
pub struct ChildToken<'a> {
    parent: &'a CancellationToken,
    token: Arc<CancellationToken>,
    registration: Option<u64>,
}

impl ChildToken<'_> {
    /// Returns a shared handle to the child that outlives the link.
    #[must_use]
    pub fn token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.token)
    }
}

impl Deref for ChildToken<'_> {
    type Target = Arc<CancellationToken>;

    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl Drop for ChildToken<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            self.parent.unregister(id);
        }
    }
}

impl std::fmt::Debug for ChildToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChildToken").field(&self.token).finish()
    }
}

fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(reason);
    })) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
