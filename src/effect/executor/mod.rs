//! Executors that run started fibers.
//!
//! The run loop itself is executor-agnostic: it runs on whichever thread
//! starts it and resumes on whichever thread completes an async step. An
//! [`Executor`] is only needed where a computation is *forked* (`IO::start`,
//! `race`, `par_map2`, the await-join scope).
//!
//! # Contract
//!
//! `execute` runs the task exactly once, eventually, on some thread. Only
//! executors documented as caller-runs may run it inline.

pub mod config;
#[cfg(feature = "async")]
pub mod runtime;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use config::RuntimeConfig;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks.
pub trait Executor: Send + Sync {
    /// Schedules `task` to run exactly once.
    fn execute(&self, task: Task);
}

/// A shared, type-erased executor.
pub type SharedExecutor = Arc<dyn Executor>;

/// Caller-runs executor: `execute` runs the task before returning.
///
/// Deterministic, which makes it convenient in tests. A started fiber runs
/// until its first pending async step before `start` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateExecutor;

impl ImmediateExecutor {
    /// This executor behind an [`Arc`].
    pub fn shared() -> SharedExecutor {
        Arc::new(Self)
    }
}

impl Executor for ImmediateExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Runs every task on its own named OS thread.
pub struct ThreadExecutor {
    thread_name: String,
    stack_size: Option<usize>,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    /// Creates an executor with the default [`RuntimeConfig`] names.
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Uses the thread name prefix and stack size of `config`.
    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            thread_name: config.thread_name().to_string(),
            stack_size: config.thread_stack_size(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// This executor behind an [`Arc`].
    pub fn shared(self) -> SharedExecutor {
        Arc::new(self)
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ThreadExecutor")
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .field("spawned", &self.spawned.load(Ordering::Relaxed))
            .finish()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = std::thread::Builder::new().name(format!("{}-{index}", self.thread_name));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let slot = Arc::new(Mutex::new(Some(task)));
        let spawned_slot = Arc::clone(&slot);
        let spawned = builder.spawn(move || {
            if let Some(task) = spawned_slot.lock().take() {
                task();
            }
        });
        if let Err(error) = spawned {
            tracing::warn!(%error, "failed to spawn executor thread; running task inline");
            let task = slot.lock().take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_immediate_runs_inline() {
        let (sender, receiver) = mpsc::channel();
        ImmediateExecutor.execute(Box::new(move || sender.send(1).unwrap()));
        assert_eq!(receiver.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_thread_executor_names_threads() {
        let config = RuntimeConfig::default().with_thread_name("unit-test");
        let executor = ThreadExecutor::with_config(&config);
        let (sender, receiver) = mpsc::channel();
        executor.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            sender.send(name).unwrap();
        }));
        assert_eq!(receiver.recv().unwrap().as_deref(), Some("unit-test-0"));
    }
}
