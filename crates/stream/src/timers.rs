//! Cancellation scopes for the session's timers and background tasks.
//!
//! Every delay the session schedules runs inside a [`TimerScope`].
//! Cancelling a scope stops every task spawned in it and in its child
//! scopes, so tearing down a job is a single synchronous call.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A tree of cancellable tasks sharing one live-task counter.
#[derive(Debug, Clone, Default)]
pub struct TimerScope {
    token: CancellationToken,
    live: Arc<AtomicUsize>,
}

/// Handle to a single scheduled delay.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl TimerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope cancelled together with this one, or on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            live: Arc::clone(&self.live),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tasks still running anywhere in this scope tree.
    pub fn live_tasks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Run `fut` until it finishes or the scope is cancelled.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let guard = LiveGuard::enter(&self.live);
        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        })
    }

    /// Run `fut` after `delay`, unless the scope or the returned handle is
    /// cancelled first.
    pub fn after<F>(&self, delay: Duration, fut: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timer = self.child();
        let handle = TimerHandle {
            token: timer.token.clone(),
        };
        timer.spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        handle
    }
}

/// Counts a task as live from spawn until its future is dropped.
struct LiveGuard {
    live: Arc<AtomicUsize>,
}

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
