// =============================================================================
// Resource Management
// =============================================================================
//
// A bracket registers its cancel token on the ambient connection before the
// acquire starts, and the token stays registered until the release has
// finished. Whichever exit path reaches the `ReleaseGuard` first takes the
// release function; every later path, the cancel token included, waits on
// the guard's `Gate` until that release is over. Cancelling a connection
// therefore completes only after every bracket under it has released.

use std::sync::Arc;

use parking_lot::Mutex;

use super::super::connection::{CancelToken, Connection};
use super::super::error::Error;
use super::super::exit::ExitCase;
use super::algebra::{Node, unerase};
use super::run_loop;
use super::{Callback, IO};

type ReleaseFn<R> = Box<dyn FnOnce(R, ExitCase) -> IO<()> + Send>;

/// Opens once; waiters registered before that are resumed by `open`.
struct Gate(Mutex<Option<Vec<Callback<()>>>>);

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(Vec::new()))))
    }

    fn open(&self) {
        let waiters = self.0.lock().take();
        for waiter in waiters.into_iter().flatten() {
            waiter.succeed(());
        }
    }

    fn wait(self: &Arc<Self>) -> IO<()> {
        let gate = Arc::clone(self);
        IO::from_callback(move |callback| {
            let mut waiters = gate.0.lock();
            if let Some(pending) = waiters.as_mut() {
                pending.push(callback);
                return;
            }
            drop(waiters);
            callback.succeed(());
        })
    }
}

struct ReleaseGuard<R> {
    connection: Connection,
    /// Empty while the acquire runs and once a path took the release.
    slot: Mutex<Option<(R, ReleaseFn<R>)>>,
    released: Arc<Gate>,
}

impl<R: Send + 'static> ReleaseGuard<R> {
    fn new(connection: Connection) -> Arc<Self> {
        Arc::new(Self {
            connection,
            slot: Mutex::new(None),
            released: Gate::new(),
        })
    }

    /// The release for `exit`, or a wait for the release another path took.
    fn release(&self, exit: ExitCase) -> IO<()> {
        let taken = self.slot.lock().take();
        match taken {
            Some((resource, release)) => {
                tracing::debug!(exit = ?exit, "releasing bracket resource");
                let released = Arc::clone(&self.released);
                IO::suspend(move || release(resource, exit))
                    .attempt()
                    .flat_map(move |result| {
                        released.open();
                        IO::from_result(result)
                    })
                    .uncancelable()
            }
            None => self.released.wait(),
        }
    }

    fn cancel_token(self: &Arc<Self>) -> CancelToken {
        let guard = Arc::clone(self);
        IO::suspend(move || guard.release(ExitCase::Cancelled))
    }

    /// Stores the acquired resource; releases it at once if the connection
    /// was cancelled during the acquire.
    fn acquired(self: Arc<Self>, resource: R, release: ReleaseFn<R>, raw: Callback<(R, Arc<Self>)>)
    where
        R: Clone,
    {
        *self.slot.lock() = Some((resource.clone(), release));
        if !self.connection.is_cancelled() {
            raw.succeed((resource, self));
            return;
        }
        self.release(ExitCase::Cancelled).run_async(move |released| {
            if let Err(error) = released {
                tracing::warn!(%error, "release after cancelled acquire failed");
            }
            raw.fail(Error::cancelled());
        });
    }
}

impl<A: Send + 'static> IO<A> {
    /// Acquires a resource, uses it, and releases it on every exit path.
    ///
    /// `release` runs exactly once after a successful `acquire`, and is told
    /// how `use_resource` finished:
    ///
    /// - [`ExitCase::Completed`]: the result of `use_resource` is returned.
    /// - [`ExitCase::Error`]: the error is re-raised; if `release` fails as
    ///   well, its error is attached to the original as suppressed.
    /// - [`ExitCase::Cancelled`]: `release` runs as a cancel token of the
    ///   execution's connection.
    ///
    /// `acquire` and `release` are uncancelable.
    ///
    /// # Resource Type
    ///
    /// The resource is handed to `use_resource` and kept for `release`, so
    /// `R` must be `Clone`. A move-only resource goes behind an [`Arc`],
    /// with a mutex when `use_resource` needs exclusive access:
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    /// use std::sync::{Arc, Mutex};
    ///
    /// struct Socket {
    ///     sent: Vec<u8>,
    ///     open: bool,
    /// }
    ///
    /// let socket = Arc::new(Mutex::new(Socket { sent: Vec::new(), open: true }));
    /// let closed = Arc::clone(&socket);
    ///
    /// let io = IO::bracket(
    ///     IO::pure(socket),
    ///     |socket| IO::delay(move || socket.lock().unwrap().sent.push(1)),
    ///     |socket| IO::delay(move || socket.lock().unwrap().open = false),
    /// );
    ///
    /// io.run_sync().unwrap();
    /// assert!(!closed.lock().unwrap().open);
    /// ```
    ///
    /// # Arguments
    ///
    /// * `acquire` - Produces the resource
    /// * `use_resource` - Uses the resource
    /// * `release` - Releases the resource
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::{ExitCase, IO};
    /// use std::sync::{Arc, Mutex};
    ///
    /// let log = Arc::new(Mutex::new(Vec::new()));
    /// let release_log = Arc::clone(&log);
    ///
    /// let io = IO::bracket_case(
    ///     IO::pure("file"),
    ///     |name| IO::<usize>::raise_error(format!("cannot read {name}")),
    ///     move |name, exit: ExitCase| {
    ///         IO::delay(move || release_log.lock().unwrap().push((name, exit.is_error())))
    ///     },
    /// );
    ///
    /// assert_eq!(io.run_sync().unwrap_err().to_string(), "cannot read file");
    /// assert_eq!(*log.lock().unwrap(), vec![("file", true)]);
    /// ```
    pub fn bracket_case<R, U, F>(acquire: IO<R>, use_resource: U, release: F) -> Self
    where
        R: Clone + Send + 'static,
        U: FnOnce(R) -> Self + Send + 'static,
        F: FnOnce(R, ExitCase) -> IO<()> + Send + 'static,
    {
        let acquire = acquire.into_node();
        let acquired: IO<(R, Arc<ReleaseGuard<R>>)> =
            IO::from_node(Node::Async(Box::new(move |connection: Connection, raw| {
                let raw = Callback::new(raw);
                let release: ReleaseFn<R> = Box::new(release);
                let guard = ReleaseGuard::new(connection.clone());
                connection.push(guard.cancel_token());
                run_loop::start(
                    acquire,
                    Box::new(move |result| match result {
                        Ok(value) => guard.acquired(unerase::<R>(value), release, raw),
                        Err(error) => {
                            drop(connection.pop());
                            guard.released.open();
                            raw.fail(error);
                        }
                    }),
                );
            })));

        acquired.flat_map(move |(resource, guard)| {
            let on_error = Arc::clone(&guard);
            Self::suspend(move || use_resource(resource)).redeem_with(
                move |error| {
                    on_error
                        .release(ExitCase::Error(error.clone()))
                        .attempt()
                        .flat_map(move |released| {
                            drop(on_error.connection.pop());
                            match released {
                                Ok(()) => Self::raise_error(error),
                                Err(release_error) => {
                                    Self::raise_error(error.with_suppressed(release_error))
                                }
                            }
                        })
                },
                move |value| {
                    guard.release(ExitCase::Completed).attempt().flat_map(move |released| {
                        drop(guard.connection.pop());
                        IO::from_result(released.map(move |()| value))
                    })
                },
            )
        })
    }

    /// [`IO::bracket_case`] with a release that ignores the exit case.
    pub fn bracket<R, U, F>(acquire: IO<R>, use_resource: U, release: F) -> Self
    where
        R: Clone + Send + 'static,
        U: FnOnce(R) -> Self + Send + 'static,
        F: FnOnce(R) -> IO<()> + Send + 'static,
    {
        Self::bracket_case(acquire, use_resource, move |resource, _| release(resource))
    }

    /// Runs `finalizer` after this IO on every exit path, with the exit case.
    pub fn guarantee_case<F>(self, finalizer: F) -> Self
    where
        F: FnOnce(ExitCase) -> IO<()> + Send + 'static,
    {
        Self::bracket_case(IO::unit(), move |()| self, move |(), exit| finalizer(exit))
    }

    /// Runs `finalizer` after this IO on every exit path.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let closed = Arc::new(AtomicBool::new(false));
    /// let flag = Arc::clone(&closed);
    ///
    /// let io = IO::<i32>::raise_error("boom")
    ///     .guarantee(IO::delay(move || flag.store(true, Ordering::SeqCst)));
    ///
    /// assert!(io.run_sync().is_err());
    /// assert!(closed.load(Ordering::SeqCst));
    /// ```
    pub fn guarantee(self, finalizer: IO<()>) -> Self {
        self.guarantee_case(move |_| finalizer)
    }

    /// Runs `token` only if this IO is cancelled while running.
    pub fn on_cancel(self, token: IO<()>) -> Self {
        self.guarantee_case(move |exit| match exit {
            ExitCase::Cancelled => token,
            ExitCase::Completed | ExitCase::Error(_) => IO::unit(),
        })
    }
}
