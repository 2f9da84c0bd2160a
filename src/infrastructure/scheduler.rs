use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Builder, Runtime};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, error, info};

use crate::shared::error::SvckitError;

struct TaskEntry {
    id: u64,
    name: String,
    join: JoinHandle<crate::Result<()>>,
}

/// Snapshot of a registered task, as returned by [`TaskScheduler::live_tasks`].
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Default)]
struct TaskRegistry {
    entries: Arc<Mutex<Vec<TaskEntry>>>,
    next_id: Arc<AtomicU64>,
}

/// Opaque reference to a scheduled unit of work.
///
/// Cancellation through [`TaskHandle::abort`] is a request, not an
/// instantaneous effect: the task settles at its next suspension point and
/// completion is observed asynchronously.
pub struct TaskHandle {
    id: u64,
    name: String,
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Cloneable spawner bound to the scheduler's runtime and task registry.
#[derive(Clone)]
pub struct SchedulerHandle {
    runtime: tokio::runtime::Handle,
    registry: TaskRegistry,
}

impl SchedulerHandle {
    /// Schedule a unit of asynchronous work. Returns immediately; the task
    /// makes progress whenever the scheduler is being driven.
    pub fn spawn<F>(&self, name: &str, fut: F) -> TaskHandle
    where
        F: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let join = self.runtime.spawn(fut);
        let abort = join.abort_handle();
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .entries
            .lock()
            .expect("task registry lock poisoned")
            .push(TaskEntry {
                id,
                name: name.to_string(),
                join,
            });
        debug!(task = name, id, "task spawned");
        TaskHandle {
            id,
            name: name.to_string(),
            abort,
        }
    }

    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }
}

/// Single-threaded cooperative task runtime.
///
/// All asynchronous work of one application instance runs here: startup,
/// jobs, the wait for termination and shutdown. Spawned futures must be
/// `Send` but execute on the one runtime thread, only making progress while
/// [`TaskScheduler::block_on`] is driving the loop.
pub struct TaskScheduler {
    runtime: Runtime,
    registry: TaskRegistry,
}

impl TaskScheduler {
    pub fn new() -> crate::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SvckitError::Scheduler(e.to_string()))?;
        Ok(Self {
            runtime,
            registry: TaskRegistry::default(),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            runtime: self.runtime.handle().clone(),
            registry: self.registry.clone(),
        }
    }

    /// Drive the scheduler until `fut` completes, returning its output.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Registered tasks that have not yet settled.
    pub fn live_tasks(&self) -> Vec<TaskInfo> {
        self.registry
            .entries
            .lock()
            .expect("task registry lock poisoned")
            .iter()
            .filter(|entry| !entry.join.is_finished())
            .map(|entry| TaskInfo {
                id: entry.id,
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Request cancellation of every registered task and drive the scheduler
    /// until each has settled.
    ///
    /// Failures observed during the sweep are reported through the log sink,
    /// never to the caller. A task that swallows cancellation and suspends on
    /// a fresh unsettled resource stalls this call indefinitely; application
    /// code must not do that.
    pub fn cancel_all(&self) {
        let entries: Vec<TaskEntry> = {
            let mut guard = self
                .registry
                .entries
                .lock()
                .expect("task registry lock poisoned");
            guard.drain(..).collect()
        };

        if entries.is_empty() {
            return;
        }

        info!("cancelling {} tasks", entries.len());
        for entry in &entries {
            entry.join.abort();
        }

        self.runtime.block_on(async {
            for entry in entries {
                report_outcome(&entry.name, entry.join.await);
            }
        });
    }

    /// Close the scheduler, releasing the runtime.
    pub fn close(self) {
        info!("closing scheduler");
        drop(self.runtime);
    }
}

fn report_outcome(name: &str, result: Result<crate::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!(task = name, "task settled"),
        Ok(Err(err)) => report_task_error(name, err),
        Err(join_err) if join_err.is_cancelled() => debug!(task = name, "task cancelled"),
        Err(join_err) => error!(task = name, "task panicked during shutdown: {join_err}"),
    }
}

// Reset connections and stale OS handles are expected while tasks unwind
// against resources the stop phase already closed; they are logged and
// suppressed. Anything else is an unhandled task failure, logged but still
// non-fatal.
fn report_task_error(name: &str, err: anyhow::Error) {
    match err.downcast_ref::<std::io::Error>() {
        Some(io) if io.kind() == std::io::ErrorKind::ConnectionReset => {
            info!(task = name, "suppressing connection reset during teardown: {io}");
        }
        Some(io) if io.raw_os_error().is_some() => {
            info!(task = name, "suppressing OS error during teardown: {io}");
        }
        _ => error!(task = name, "unhandled task error during shutdown: {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_block_on_returns_output() {
        let scheduler = TaskScheduler::new().unwrap();
        assert_eq!(scheduler.block_on(async { 2 + 2 }), 4);
    }

    #[test]
    fn test_spawned_task_runs_while_driving() {
        let scheduler = TaskScheduler::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();

        scheduler.handle().spawn("ticker", async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        scheduler.block_on(async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_all_drains_every_task() {
        let scheduler = TaskScheduler::new().unwrap();
        let handle = scheduler.handle();

        handle.spawn("stuck", async {
            std::future::pending::<()>().await;
            Ok(())
        });
        handle.spawn("noisy", async {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into())
        });
        handle.spawn("broken", async { Err(anyhow::anyhow!("boom")) });

        assert_eq!(scheduler.live_tasks().len(), 3);

        scheduler.cancel_all();
        assert!(scheduler.live_tasks().is_empty());
        scheduler.close();
    }

    #[test]
    fn test_task_handle_reports_completion() {
        let scheduler = TaskScheduler::new().unwrap();
        let task = scheduler.handle().spawn("quick", async { Ok(()) });

        assert_eq!(task.name(), "quick");
        scheduler.block_on(async {
            tokio::task::yield_now().await;
        });
        assert!(task.is_finished());
    }
}
