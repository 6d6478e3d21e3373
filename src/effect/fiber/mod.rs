//! Fibers - independently running executions.
//!
//! [`IO::start`] submits a computation to an executor under a fresh
//! [`Connection`] and returns a [`Fiber`] handle. The handle can wait for the
//! result ([`Fiber::join`], [`Fiber::outcome`]) or cancel the execution
//! ([`Fiber::cancel`]).
//!
//! # Cancellation
//!
//! Cancelling a fiber runs every cancel token of its connection (pending
//! async steps, bracket releases) and only then publishes
//! [`Outcome::Cancelled`]. A joiner that observes the cancellation therefore
//! also observes every release of the fiber as finished.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::{IO, ThreadExecutor};
//!
//! let executor = ThreadExecutor::new().shared();
//!
//! let program = IO::delay(|| 20)
//!     .start(executor)
//!     .flat_map(|fiber| fiber.join())
//!     .map(|n| n + 1);
//!
//! assert_eq!(program.run_sync().unwrap(), 21);
//! ```

mod promise;
pub mod scope;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::connection::Connection;
use super::executor::SharedExecutor;
use super::exit::Outcome;
use super::io::IO;
use super::io::algebra::unerase;
use super::io::run_loop;
use promise::Promise;

/// Process-unique fiber identifier, used in tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "fiber-{}", self.0)
    }
}

/// A handle to a started computation.
pub struct Fiber<A> {
    id: FiberId,
    connection: Connection,
    promise: Promise<A>,
}

impl<A> Clone for Fiber<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connection: self.connection.clone(),
            promise: self.promise.clone(),
        }
    }
}

impl<A> fmt::Debug for Fiber<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fiber")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl<A: Clone + Send + 'static> Fiber<A> {
    /// Submits `io` to `executor` and returns its handle.
    pub(crate) fn spawn(io: IO<A>, executor: &SharedExecutor) -> Self {
        let fiber = Self {
            id: FiberId::next(),
            connection: Connection::new(),
            promise: Promise::new(),
        };
        let id = fiber.id;
        let connection = fiber.connection.clone();
        let promise = fiber.promise.clone();
        let node = io.into_node();

        tracing::trace!(fiber = %id, "fiber started");
        executor.execute(Box::new(move || {
            let observed = connection.clone();
            run_loop::start_cancelable(
                node,
                connection,
                Box::new(move |result| {
                    if let Err(error) = &result
                        && error.is_cancelled()
                        && observed.is_cancelled()
                    {
                        tracing::trace!(fiber = %id, "fiber stopped after cancellation");
                        return;
                    }
                    let outcome = match result {
                        Ok(value) => Outcome::Completed(unerase::<A>(value)),
                        Err(error) => Outcome::Errored(error),
                    };
                    tracing::trace!(fiber = %id, completed = outcome.is_completed(), "fiber finished");
                    promise.complete(outcome);
                }),
            );
        }));
        fiber
    }

    /// The fiber's identifier.
    pub const fn id(&self) -> FiberId {
        self.id
    }

    /// Returns `true` once the fiber's connection was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.connection.is_cancelled()
    }

    /// Waits for the fiber's three-way outcome without raising.
    ///
    /// Cancelling the waiting execution stops waiting; the fiber keeps
    /// running.
    pub fn outcome(&self) -> IO<Outcome<A>> {
        let promise = self.promise.clone();
        IO::cancelable(move |callback| {
            let listener = promise.clone();
            match listener.listen(Box::new(move |outcome| callback.succeed(outcome))) {
                Some(id) => IO::delay(move || promise.remove(id)),
                None => IO::unit(),
            }
        })
    }

    /// Waits for the fiber's value.
    ///
    /// A failed fiber re-raises its error; a cancelled fiber raises
    /// [`Error::cancelled`](super::Error::cancelled).
    pub fn join(&self) -> IO<A> {
        self.outcome()
            .flat_map(|outcome| IO::from_result(outcome.into_result()))
    }

    /// Cancels the fiber.
    ///
    /// Runs the fiber's cancel tokens, then publishes
    /// [`Outcome::Cancelled`] unless the fiber already finished. Cancelling
    /// twice is a no-op.
    pub fn cancel(&self) -> IO<()> {
        let id = self.id;
        let connection = self.connection.clone();
        let promise = self.promise.clone();
        IO::suspend(move || {
            tracing::debug!(fiber = %id, "cancelling fiber");
            connection.cancel()
        })
        .attempt()
        .flat_map(move |result| {
            promise.complete(Outcome::Cancelled);
            IO::from_result(result)
        })
    }

    /// The outcome, if the fiber has finished.
    pub fn try_outcome(&self) -> Option<Outcome<A>> {
        self.promise.get()
    }

    /// Calls `listener` with the outcome once it is known.
    pub(crate) fn listen<F>(&self, listener: F)
    where
        F: FnOnce(Outcome<A>) + Send + 'static,
    {
        self.promise.listen(Box::new(listener));
    }
}

impl<A: Clone + Send + 'static> IO<A> {
    /// Starts this IO on `executor` as a fiber.
    ///
    /// Nothing is submitted until the returned IO runs.
    pub fn start(self, executor: SharedExecutor) -> IO<Fiber<A>> {
        IO::delay(move || Fiber::spawn(self, &executor))
    }
}
