use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct TaskSupervisorState {
    /// Number of calls currently being served.
    running: AtomicU64,
    /// Token cancelled when stop is requested.
    stop: CancellationToken,
    /// Token cancelled once stop was requested and no call is running.
    stopped: CancellationToken,
}

impl TaskSupervisorState {
    fn finish_async_task(&self) {
        let running = self.running.fetch_sub(1, Ordering::SeqCst) - 1;
        if running == 0 && self.stop.is_cancelled() {
            self.stopped.cancel();
        }
    }
}

/// Tracks the calls a server is serving so that shutdown can wait for them.
///
/// ```rust
/// # use shoprpc::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::default();
/// let guard = supervisor.start_async_task();
/// tokio::spawn(async move {
///     // serve the call
///     drop(guard);
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TaskSupervisor(Arc<TaskSupervisorState>);

/// Keeps one call counted as running until dropped.
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisor {
    /// Requests shutdown. New calls should be refused from now on.
    pub fn stop(&self) {
        self.0.stop.cancel();
        if self.0.running.load(Ordering::SeqCst) == 0 {
            self.0.stopped.cancel();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.stop.is_cancelled()
    }

    /// Resolves when stop is requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Resolves when stop was requested and every running call finished.
    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    #[must_use]
    pub fn running(&self) -> u64 {
        self.0.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.0.running.fetch_add(1, Ordering::SeqCst);
        TaskSupervisorGuard(self.0.clone())
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}
