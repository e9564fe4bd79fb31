//! Tracked background work.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cinegate_core::{describe_panic, GatewayError, GatewayResult};
use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{TaskError, TaskResult};
use crate::task::{TaskId, TaskStats};

/// Result of waiting for in-flight tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished.
    Drained,
    /// The timeout elapsed first.
    TimedOut {
        /// Tasks still running when the wait gave up.
        remaining: usize,
    },
}

impl DrainOutcome {
    /// Returns `true` if every task finished.
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained)
    }

    /// Converts a timed-out drain into [`GatewayError::DrainTimeout`].
    pub fn into_result(self) -> GatewayResult<()> {
        match self {
            Self::Drained => Ok(()),
            Self::TimedOut { remaining } => Err(GatewayError::DrainTimeout { remaining }),
        }
    }
}

#[derive(Debug)]
struct Shared {
    in_flight: AtomicUsize,
    idle: Notify,
    accepting: AtomicBool,
    stats: TaskStats,
}

/// Counts one task in flight until dropped.
///
/// Created on the spawning side, so the count is raised before the task can
/// be observed by a concurrent drain.
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl InFlightGuard {
    fn acquire(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Runs fire-and-forget work off the request path and lets shutdown wait for
/// it.
///
/// Cloning is cheap; clones share the same in-flight count.
///
/// # Example
///
/// ```
/// use cinegate_tasks::{BackgroundTasks, DrainOutcome};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let tasks = BackgroundTasks::new();
/// tasks
///     .spawn("welcome-email", async { Ok::<_, std::io::Error>(()) })
///     .unwrap();
///
/// let outcome = tasks.await_drain(Duration::from_secs(1)).await;
/// assert_eq!(outcome, DrainOutcome::Drained);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    shared: Arc<Shared>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    /// Create an empty manager that accepts work.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                accepting: AtomicBool::new(true),
                stats: TaskStats::default(),
            }),
        }
    }

    /// Number of tasks started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &TaskStats {
        &self.shared.stats
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        !self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Run `task` in the background.
    ///
    /// The task is counted in flight before this returns. An `Err` result or
    /// a panic is logged and never reaches the caller; neither can take the
    /// process down.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Closed`] once the manager has been closed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F, E>(&self, name: impl Into<String>, task: F) -> TaskResult<TaskId>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let guard = InFlightGuard::acquire(&self.shared);
        if self.is_closed() {
            drop(guard);
            warn!(task_name = %name, "rejected background task after close");
            return Err(TaskError::closed(name));
        }

        let id = TaskId::new();
        let shared = Arc::clone(&self.shared);
        shared.stats.record_spawn();
        debug!(task_id = %id, task_name = %name, "spawning background task");

        tokio::spawn(async move {
            let _guard = guard;
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    shared.stats.record_completed();
                    debug!(task_id = %id, task_name = %name, "background task completed");
                }
                Ok(Err(err)) => {
                    shared.stats.record_failed();
                    error!(task_id = %id, task_name = %name, error = %err, "background task failed");
                }
                Err(payload) => {
                    shared.stats.record_panicked();
                    error!(
                        task_id = %id,
                        task_name = %name,
                        panic = %describe_panic(payload.as_ref()),
                        "background task panicked"
                    );
                }
            }
        });

        Ok(id)
    }

    /// Stop accepting new work. Tasks already running are unaffected.
    pub fn close(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
    }

    /// Wait until no task is in flight, or until `timeout` elapses.
    ///
    /// Returns immediately when nothing is running.
    pub async fn await_drain(&self, timeout: Duration) -> DrainOutcome {
        let wait = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                // Register before re-reading the count so a wakeup between
                // the read and the await is not lost.
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => DrainOutcome::Drained,
            Err(_) => DrainOutcome::TimedOut {
                remaining: self.in_flight(),
            },
        }
    }

    /// Close, then drain with `timeout`, logging the outcome.
    pub async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        self.close();
        let pending = self.in_flight();
        info!(pending, timeout = ?timeout, "draining background tasks");

        let outcome = self.await_drain(timeout).await;
        match outcome {
            DrainOutcome::Drained => info!("background tasks drained"),
            DrainOutcome::TimedOut { remaining } => {
                warn!(remaining, "background task drain timed out");
            }
        }
        outcome
    }
}
