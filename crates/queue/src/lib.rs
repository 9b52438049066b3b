//! Bounded-concurrency FIFO task queue.
//!
//! Tasks start in submission order, at most `concurrency` at a time. A task
//! failure rejects that task's own future and trips the error hook, but
//! never halts the queue. [`TaskQueue::on_idle`] resolves exactly when
//! pending and in-flight both reach zero.
//!
//! The queue requires a running tokio runtime at enqueue time; work is
//! dispatched onto `tokio::spawn`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use psr_domain::telemetry::QueueSnapshot;
use psr_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
}

impl QueueMetrics {
    /// The counter subset carried on telemetry events.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending,
            in_flight: self.in_flight,
            completed: self.completed,
            failed: self.failed,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskQueue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;
type ErrorHook = dyn Fn(&Error) + Send + Sync;

struct DispatchState {
    pending: VecDeque<BoxedTask>,
    in_flight: usize,
}

struct Stats {
    completed: u64,
    failed: u64,
    last_error: Option<String>,
    last_duration_ms: Option<u64>,
}

struct Inner {
    concurrency: usize,
    dispatch: Mutex<DispatchState>,
    stats: Mutex<Stats>,
    idle: Notify,
    error_hook: Mutex<Option<Arc<ErrorHook>>>,
}

/// Bounded-concurrency FIFO queue over `tokio::spawn`.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// `concurrency` is clamped to at least 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                concurrency: concurrency.max(1),
                dispatch: Mutex::new(DispatchState {
                    pending: VecDeque::new(),
                    in_flight: 0,
                }),
                stats: Mutex::new(Stats {
                    completed: 0,
                    failed: 0,
                    last_error: None,
                    last_duration_ms: None,
                }),
                idle: Notify::new(),
                error_hook: Mutex::new(None),
            }),
        }
    }

    /// Register a hook invoked on every task failure.
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.inner.error_hook.lock() = Some(Arc::new(hook));
    }

    /// Submit a task. The returned future resolves with the task's own
    /// result once it has run; dropping the future does not cancel the task.
    pub fn enqueue<T, Fut>(&self, task: Fut) -> impl Future<Output = Result<T>> + Send
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let inner = Arc::clone(&self.inner);

        let wrapped: BoxedTask = Box::pin(async move {
            let start = Instant::now();
            let result = task.await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            {
                let mut stats = inner.stats.lock();
                stats.last_duration_ms = Some(elapsed_ms);
                match &result {
                    Ok(_) => stats.completed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        stats.last_error = Some(e.to_string());
                    }
                }
            }
            if let Err(e) = &result {
                let hook = inner.error_hook.lock().clone();
                if let Some(hook) = hook {
                    hook(e);
                }
                tracing::debug!(error = %e, "queued task failed");
            }

            // Receiver may be gone (fire-and-forget submission).
            let _ = tx.send(result);
        });

        {
            let mut dispatch = self.inner.dispatch.lock();
            dispatch.pending.push_back(wrapped);
        }
        Self::pump(&self.inner);

        async move {
            rx.await
                .unwrap_or_else(|_| Err(Error::Queue("task dropped before completion".into())))
        }
    }

    /// Start queued tasks while capacity allows, preserving FIFO order.
    fn pump(inner: &Arc<Inner>) {
        loop {
            let task = {
                let mut dispatch = inner.dispatch.lock();
                if dispatch.in_flight >= inner.concurrency {
                    return;
                }
                let Some(task) = dispatch.pending.pop_front() else {
                    return;
                };
                dispatch.in_flight += 1;
                task
            };

            let inner_done = Arc::clone(inner);
            tokio::spawn(async move {
                task.await;
                let now_idle = {
                    let mut dispatch = inner_done.dispatch.lock();
                    dispatch.in_flight -= 1;
                    dispatch.in_flight == 0 && dispatch.pending.is_empty()
                };
                if now_idle {
                    inner_done.idle.notify_waiters();
                }
                Self::pump(&inner_done);
            });
        }
    }

    /// Number of tasks not yet finished (pending + in-flight).
    pub fn len(&self) -> usize {
        let dispatch = self.inner.dispatch.lock();
        dispatch.pending.len() + dispatch.in_flight
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> QueueMetrics {
        let dispatch = self.inner.dispatch.lock();
        let stats = self.inner.stats.lock();
        QueueMetrics {
            pending: dispatch.pending.len() as u64,
            in_flight: dispatch.in_flight as u64,
            completed: stats.completed,
            failed: stats.failed,
            last_error: stats.last_error.clone(),
            last_duration_ms: stats.last_duration_ms,
        }
    }

    /// Resolve once pending and in-flight are simultaneously zero. Resolves
    /// immediately on an idle queue.
    pub async fn on_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
