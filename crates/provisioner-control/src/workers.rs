//! Worker pool supervisor.
//!
//! Each worker is a tokio task driving one [`MessageConsumer`]. The pool
//! keeps the consumers so it can ask them how busy they are and tell them
//! to stop; it never aborts a task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use provisioner_core::WorkerId;
use tokio::task::JoinHandle;

use crate::consumer::{BrokerConfig, ConsumerFactory, MessageConsumer};
use crate::lifecycle::StateView;
use crate::shutdown::Shutdown;

struct Worker {
    id: WorkerId,
    consumer: Arc<dyn MessageConsumer>,
    handle: JoinHandle<()>,
}

/// Counts a worker as live for as long as it is held.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The set of message-consuming workers.
#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<Vec<Worker>>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `count` workers numbered from 0, one at a time, pausing
    /// `spawn_delay` between them. Every consumer gets its own copy of
    /// `state`.
    ///
    /// Workers whose consumer cannot be constructed are logged and skipped.
    /// An interrupt stops further spawning. Returns the number of workers
    /// started.
    pub async fn start(
        &self,
        count: u32,
        factory: &dyn ConsumerFactory,
        broker: &BrokerConfig,
        state: &StateView,
        spawn_delay: Duration,
        shutdown: &mut Shutdown,
    ) -> usize {
        let mut started = 0;

        for index in 0..count {
            if shutdown.is_triggered() {
                tracing::info!(
                    started,
                    requested = count,
                    "Interrupted, not starting remaining workers"
                );
                break;
            }

            let id = WorkerId::new(index);
            match factory.create(broker, id, state.clone()) {
                Ok(consumer) => {
                    self.spawn(id, consumer);
                    started += 1;
                    tracing::info!(worker = %id, "Started worker");
                }
                Err(e) => {
                    tracing::error!(worker = %id, error = %e, "Failed to start worker");
                }
            }

            if index + 1 < count {
                tokio::select! {
                    () = tokio::time::sleep(spawn_delay) => {}
                    () = shutdown.triggered() => {}
                }
            }
        }

        tracing::info!(started, requested = count, "Worker pool started");
        started
    }

    fn spawn(&self, id: WorkerId, consumer: Arc<dyn MessageConsumer>) {
        let guard = LiveGuard::new(&self.live);
        let task_consumer = Arc::clone(&consumer);

        let handle = tokio::spawn(async move {
            let _live = guard;
            let outcome = AssertUnwindSafe(task_consumer.run()).catch_unwind().await;

            let failed = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(worker = %id, "Worker finished");
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!(worker = %id, error = %e, "Worker failed");
                    true
                }
                Err(_) => {
                    tracing::error!(worker = %id, "Worker panicked");
                    true
                }
            };

            if failed {
                if let Err(e) = task_consumer.stop() {
                    tracing::warn!(worker = %id, error = %e, "Failed to stop consumer");
                }
            }
        });

        self.workers.lock().push(Worker {
            id,
            consumer,
            handle,
        });
    }

    /// Tell every consumer to stop. Does not wait for the workers to exit.
    pub fn stop_all(&self) {
        let workers = self.workers.lock();
        for worker in workers.iter() {
            match worker.consumer.stop() {
                Ok(()) => tracing::debug!(worker = %worker.id, "Stop requested"),
                Err(e) => {
                    tracing::warn!(worker = %worker.id, error = %e, "Failed to stop worker");
                }
            }
        }
        tracing::info!(workers = workers.len(), "Stop requested for all workers");
    }

    /// Wait up to `grace` for every worker task to exit.
    ///
    /// The pool is empty afterwards and can be started again. Returns false
    /// if some workers were still running when `grace` ran out.
    pub async fn join(&self, grace: Duration) -> bool {
        let workers = std::mem::take(&mut *self.workers.lock());

        let joined = tokio::time::timeout(grace, async {
            for worker in workers {
                if let Err(e) = worker.handle.await {
                    tracing::error!(
                        worker = %worker.id,
                        error = %e,
                        "Worker task ended abnormally"
                    );
                }
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(
                live_workers = self.live_workers(),
                "Workers still running after stop"
            );
        }
        joined.is_ok()
    }

    /// Sum of in-flight requests across all consumers.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .map(|worker| worker.consumer.in_flight())
            .sum()
    }

    /// Number of worker tasks that have not exited.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of workers started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// Returns true if no workers were started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }
}
