//! Cooperatively cancellable background tasks.
//!
//! Every long-running receiver loop in the worker is represented by a
//! [`CancellableTask`]: a spawned loop plus a run flag and a broadcast
//! shutdown signal. Cancellation is advisory, never preemptive — the loop
//! polls its flag between discrete units of work, and a loop blocked inside
//! one receive operation observes the stop only after that operation
//! returns or times out. Callers needing bounded shutdown latency must size
//! their receive timeouts accordingly.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, WorkerError};

/// Handed to the task's loop at spawn time. The loop reads the run flag
/// between units of work and may `select!` on [`cancelled`](Self::cancelled)
/// to observe a stop request without waiting out a full receive timeout.
pub struct TaskContext {
    running: Arc<AtomicBool>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl TaskContext {
    /// Current run flag value. Written only by `stop()` on the caller side;
    /// the loop itself never sets it.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once `stop()` has been called.
    pub async fn cancelled(&mut self) {
        // A RecvError means the sender is gone, which is also a stop.
        let _ = self.shutdown_rx.recv().await;
    }
}

/// A long-running background unit of work with a cooperative stop flag.
///
/// # Examples
///
/// ```rust
/// use dataflow_worker::execution::CancellableTask;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let task = CancellableTask::spawn("ticker", |ctx| async move {
///         while ctx.running() {
///             tokio::time::sleep(Duration::from_millis(10)).await;
///         }
///     });
///
///     assert!(task.running());
///     task.stop();
///     task.join().await.unwrap();
///     assert!(!task.running());
/// }
/// ```
pub struct CancellableTask {
    name: String,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CancellableTask {
    /// Spawn the task's loop and transition it to running.
    pub fn spawn<F, Fut>(name: impl Into<String>, loop_fn: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);

        let context = TaskContext {
            running: Arc::clone(&running),
            shutdown_rx,
        };

        let flag = Arc::clone(&running);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            debug!(task = %task_name, "Task started");
            loop_fn(context).await;
            // Clear the flag on natural exit too, so observers see the task
            // is no longer live even when nobody called stop().
            flag.store(false, Ordering::SeqCst);
            debug!(task = %task_name, "Task exited");
        });

        Self {
            name,
            running,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current run flag value for observers.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the task's loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.lock().as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request a cooperative stop: clear the run flag and fire the shutdown
    /// signal. Returns immediately; the loop exits after at most one further
    /// receive cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // No receivers left just means the loop already exited.
        let _ = self.shutdown_tx.send(());
        debug!(task = %self.name, "Stop requested");
    }

    /// Wait for the task's loop to exit. A second `join` fails fast with
    /// `ShutdownInProgress` since the handle has already been consumed.
    pub async fn join(&self) -> Result<()> {
        let handle = {
            let mut slot = self.handle.lock();
            slot.take()
        };
        let handle = handle.ok_or_else(|| {
            WorkerError::ShutdownInProgress(format!("task '{}' already joined", self.name))
        })?;

        handle.await.map_err(|e| {
            WorkerError::ShutdownInProgress(format!("task '{}' did not exit cleanly: {e}", self.name))
        })
    }

    /// A fresh shutdown receiver for subordinate loops (e.g. per-connection
    /// handlers spawned by a receiver's accept loop).
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_starts_running() {
        let task = CancellableTask::spawn("idle", |mut ctx| async move {
            ctx.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(task.running());
        assert!(!task.is_finished());

        task.stop();
        task.join().await.unwrap();
        assert!(!task.running());
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_flag_cleared_on_natural_exit() {
        let task = CancellableTask::spawn("one_shot", |_ctx| async move {});

        task.join().await.unwrap();
        assert!(!task.running());
    }

    #[tokio::test]
    async fn test_double_join_fails_fast() {
        let task = CancellableTask::spawn("idle", |mut ctx| async move {
            ctx.cancelled().await;
        });

        task.stop();
        task.join().await.unwrap();

        let second = task.join().await;
        assert!(matches!(second, Err(WorkerError::ShutdownInProgress(_))));
    }

    #[tokio::test]
    async fn test_stop_observed_between_units_of_work() {
        let task = CancellableTask::spawn("poller", |ctx| async move {
            while ctx.running() {
                // One discrete unit of work per cycle.
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        task.stop();

        tokio::time::timeout(Duration::from_millis(200), task.join())
            .await
            .expect("loop must observe the flag within one cycle")
            .unwrap();
    }
}
