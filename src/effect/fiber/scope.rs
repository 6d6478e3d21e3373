//! Await-join scope.
//!
//! Tasks spawned through a [`Scope`] are tracked. The first
//! [`Deferred::await_`] joins every tracked sibling before the awaited task,
//! so a sibling that is stuck (or was cancelled) is observed instead of being
//! silently abandoned. When the scope body completes, every tracked task is
//! joined; when it fails or is cancelled, every tracked task is cancelled.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::{IO, ThreadExecutor, await_join_scope};
//!
//! let program = await_join_scope(ThreadExecutor::new().shared(), |scope| {
//!     let second = scope.clone();
//!     scope.spawn(IO::delay(|| 1)).flat_map(move |one| {
//!         second
//!             .spawn(IO::delay(|| 2))
//!             .flat_map(move |two| one.await_().map2(two.await_(), |a, b| a + b))
//!     })
//! });
//!
//! assert_eq!(program.run_sync().unwrap(), 3);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::super::connection::cancel_all;
use super::super::executor::SharedExecutor;
use super::super::exit::{ExitCase, Outcome};
use super::super::io::IO;
use super::{Fiber, FiberId};

/// A tracked task with its value type erased.
trait Joinable: Send + Sync {
    fn id(&self) -> FiberId;

    fn join_unit(&self) -> IO<Outcome<()>>;

    fn cancel(&self) -> IO<()>;
}

impl<A: Clone + Send + 'static> Joinable for Fiber<A> {
    fn id(&self) -> FiberId {
        Self::id(self)
    }

    fn join_unit(&self) -> IO<Outcome<()>> {
        self.outcome().map(|outcome| outcome.map(|_| ()))
    }

    fn cancel(&self) -> IO<()> {
        Self::cancel(self)
    }
}

/// Spawns and tracks tasks for [`await_join_scope`].
#[derive(Clone)]
pub struct Scope {
    executor: SharedExecutor,
    tasks: Arc<Mutex<Vec<Arc<dyn Joinable>>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Scope")
            .field("tasks", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}

impl Scope {
    fn new(executor: SharedExecutor) -> Self {
        Self {
            executor,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts `io` as a tracked task.
    pub fn spawn<B>(&self, io: IO<B>) -> IO<Deferred<B>>
    where
        B: Clone + Send + 'static,
    {
        let scope = self.clone();
        io.start(Arc::clone(&self.executor)).map(move |fiber| {
            scope.tasks.lock().push(Arc::new(fiber.clone()));
            Deferred { fiber, scope }
        })
    }

    fn snapshot(&self, except: Option<FiberId>) -> Vec<Arc<dyn Joinable>> {
        self.tasks
            .lock()
            .iter()
            .filter(|task| Some(task.id()) != except)
            .cloned()
            .collect()
    }

    /// Joins every tracked task except `except`.
    ///
    /// Raises the first error outcome; cancelled tasks count as joined.
    fn join_all(&self, except: Option<FiberId>) -> IO<()> {
        let tasks = self.snapshot(except);
        tracing::debug!(tasks = tasks.len(), "joining scope tasks");
        tasks.into_iter().fold(IO::unit(), |joined, task| {
            joined.flat_map(move |()| {
                task.join_unit().flat_map(|outcome| match outcome {
                    Outcome::Errored(error) => IO::raise_error(error),
                    Outcome::Completed(()) | Outcome::Cancelled => IO::unit(),
                })
            })
        })
    }

    fn cancel_all(&self) -> IO<()> {
        let tasks = self.snapshot(None);
        tracing::debug!(tasks = tasks.len(), "cancelling scope tasks");
        cancel_all(tasks.iter().rev().map(|task| task.cancel()))
    }

    /// Number of tasks spawned so far.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns `true` if no task was spawned yet.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

/// A task spawned in a [`Scope`].
pub struct Deferred<B> {
    fiber: Fiber<B>,
    scope: Scope,
}

impl<B> Clone for Deferred<B> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<B> fmt::Debug for Deferred<B> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Deferred")
            .field("fiber", &self.fiber)
            .finish_non_exhaustive()
    }
}

impl<B: Clone + Send + 'static> Deferred<B> {
    /// Joins every sibling in the scope, then this task.
    ///
    /// A sibling's error is raised; a cancelled sibling is not an error.
    pub fn await_(&self) -> IO<B> {
        let scope = self.scope.clone();
        let own = self.fiber.id();
        let fiber = self.fiber.clone();
        IO::suspend(move || scope.join_all(Some(own))).then(fiber.join())
    }

    /// Cancels this task.
    pub fn cancel(&self) -> IO<()> {
        self.fiber.cancel()
    }

    /// The underlying fiber.
    pub const fn fiber(&self) -> &Fiber<B> {
        &self.fiber
    }
}

/// Runs `body` with a [`Scope`] whose tasks cannot outlive it.
///
/// On completion every task still running is joined (a failed task fails the
/// scope). On error or cancellation every task is cancelled.
pub fn await_join_scope<A, F>(executor: SharedExecutor, body: F) -> IO<A>
where
    A: Send + 'static,
    F: FnOnce(Scope) -> IO<A> + Send + 'static,
{
    let scope = Scope::new(executor);
    let finalizer = scope.clone();
    IO::suspend(move || body(scope)).guarantee_case(move |exit| match exit {
        ExitCase::Completed => finalizer.join_all(None),
        ExitCase::Error(_) | ExitCase::Cancelled => finalizer.cancel_all(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::executor::ImmediateExecutor;

    #[test]
    fn test_spawn_tracks_tasks() {
        let scope = Scope::new(ImmediateExecutor::shared());
        let first = scope.spawn(IO::pure(1)).run_sync().unwrap();
        assert_eq!(scope.len(), 1);
        assert_eq!(first.await_().run_sync().unwrap(), 1);
    }

    #[test]
    fn test_await_raises_sibling_error() {
        let scope = Scope::new(ImmediateExecutor::shared());
        scope.spawn(IO::<i32>::raise_error("sibling")).run_sync().unwrap();
        let own = scope.spawn(IO::pure(2)).run_sync().unwrap();
        assert_eq!(own.await_().run_sync().unwrap_err().to_string(), "sibling");
    }

    #[test]
    fn test_cancelled_sibling_is_not_an_error() {
        let scope = Scope::new(ImmediateExecutor::shared());
        let stuck = scope.spawn(IO::<i32>::never()).run_sync().unwrap();
        let own = scope.spawn(IO::pure(3)).run_sync().unwrap();
        stuck.cancel().run_sync().unwrap();
        assert_eq!(own.await_().run_sync().unwrap(), 3);
    }

    #[test]
    fn test_failed_body_cancels_tasks() {
        let tracked = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&tracked);
        let program: IO<()> = await_join_scope(ImmediateExecutor::shared(), move |scope| {
            scope.spawn(IO::<i32>::never()).flat_map(move |task| {
                *sink.lock() = Some(task);
                IO::raise_error("body failed")
            })
        });
        assert_eq!(program.run_sync().unwrap_err().to_string(), "body failed");
        let task = tracked.lock().take().unwrap();
        assert!(task.fiber().try_outcome().unwrap().is_cancelled());
    }
}
