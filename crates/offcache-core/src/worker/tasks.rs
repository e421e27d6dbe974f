//! Background work that must outlive the response that started it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, warn};

/// Tracks fire-and-forget tasks so the host can wait for them.
///
/// Any number of callers may `settle` at once; each returns only when
/// nothing is left running. Dropping the set aborts whatever is still running.
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    // Tasks spawned and not yet finished
    pending: Arc<watch::Sender<usize>>,
}

/// Decrements the pending count when a task finishes, panics or is aborted.
struct PendingGuard(Arc<watch::Sender<usize>>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            set: Mutex::new(JoinSet::new()),
            pending: Arc::new(pending),
        }
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a task on the current Tokio runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        // Reap finished tasks so a long-running host doesn't accumulate them
        while let Some(done) = set.try_join_next() {
            log_join(done);
        }
        self.pending.send_modify(|n| *n += 1);
        let guard = PendingGuard(Arc::clone(&self.pending));
        set.spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every tracked task has finished, including tasks spawned
    /// while waiting. Returns how many finished tasks this call reaped.
    ///
    /// Tasks stay owned by the set while waiting, so cancelling this future
    /// leaves them running.
    pub async fn settle(&self) -> usize {
        let mut pending = self.pending.subscribe();
        let mut joined = 0;
        loop {
            // The sender lives as long as `self`, so this cannot fail
            let _ = pending.wait_for(|n| *n == 0).await;
            {
                let mut set = self.lock();
                while let Some(done) = set.try_join_next() {
                    log_join(done);
                    joined += 1;
                }
                if set.is_empty() {
                    return joined;
                }
            }
            // A task dropped its guard but the set hasn't seen it complete yet
            tokio::task::yield_now().await;
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Background task panicked");
        } else {
            warn!(error = %e, "Background task cancelled");
        }
    }
}
