//! IO - lazy, stack-safe, cancellable effects.
//!
//! An `IO<A>` *describes* a computation that may perform side effects, fail
//! with an [`Error`], or wait for an external callback. Nothing runs until
//! the value is handed to one of the runners (`run_sync`, `run_async`,
//! `run_async_cancelable`, `into_future`), which interpret it with a
//! trampolined loop: chains of any length run in constant native stack.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::IO;
//!
//! let io = IO::pure(10)
//!     .map(|x| x * 2)
//!     .flat_map(|x| IO::pure(x + 1));
//! assert_eq!(io.run_sync().unwrap(), 21);
//! ```
//!
//! # Side Effect Deferral
//!
//! ```rust
//! use lambars_fx::effect::IO;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let executed = Arc::new(AtomicBool::new(false));
//! let executed_clone = executed.clone();
//!
//! let io = IO::delay(move || {
//!     executed_clone.store(true, Ordering::SeqCst);
//!     42
//! });
//!
//! // Not executed yet
//! assert!(!executed.load(Ordering::SeqCst));
//!
//! assert_eq!(io.run_sync().unwrap(), 42);
//! assert!(executed.load(Ordering::SeqCst));
//! ```
//!
//! # Errors and Cancellation
//!
//! A raised error unwinds to the nearest `handle_error_with`, `attempt` or
//! `redeem_with`. Cancellation is cooperative: the run loop checks its
//! [`Connection`] between steps and at every async boundary, and a cancelled
//! execution terminates with [`Error::cancelled`].

pub(crate) mod algebra;
mod bracket;
mod concurrent;
pub(crate) mod run_loop;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::connection::Connection;
use super::error::Error;
use crate::control::Either;
use algebra::{Child, Frame, Node, RawCallback, erase, unerase};
use run_loop::Latch;

/// A lazy description of a computation producing `A`.
///
/// `IO` is move-only and consumed by running it, so every description is
/// executed at most once.
///
/// # Monad Laws
///
/// 1. **Left Identity**: `IO::pure(a).flat_map(f) == f(a)`
/// 2. **Right Identity**: `m.flat_map(IO::pure) == m`
/// 3. **Associativity**: `m.flat_map(f).flat_map(g) == m.flat_map(|x| f(x).flat_map(g))`
#[must_use = "IO is lazy and does nothing unless run"]
pub struct IO<A> {
    node: Node,
    _marker: PhantomData<fn() -> A>,
}

impl<A> fmt::Debug for IO<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("IO(<deferred>)")
    }
}

impl<A: Send + 'static> IO<A> {
    pub(crate) const fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Wraps an already computed value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// assert_eq!(IO::pure(42).run_sync().unwrap(), 42);
    /// ```
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::Pure(erase(value)))
    }

    /// An effect that fails with `error`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// let io: IO<i32> = IO::raise_error("boom");
    /// assert_eq!(io.run_sync().unwrap_err().to_string(), "boom");
    /// ```
    pub fn raise_error(error: impl Into<Error>) -> Self {
        Self::from_node(Node::RaiseError(error.into()))
    }

    /// Defers a side effect until the IO is run.
    ///
    /// A panic inside `thunk` is raised as an [`Error`] with a panic cause.
    pub fn delay<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || Ok(erase(thunk())))))
    }

    /// Alias of [`IO::delay`].
    pub fn new<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::delay(thunk)
    }

    /// Defers a fallible side effect; an `Err` is raised.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// let io = IO::try_delay(|| "12".parse::<i32>());
    /// assert_eq!(io.run_sync().unwrap(), 12);
    ///
    /// let io = IO::try_delay(|| "x".parse::<i32>());
    /// assert!(io.run_sync().is_err());
    /// ```
    pub fn try_delay<F, E>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || {
            thunk().map(erase).map_err(Error::new)
        })))
    }

    /// Lifts a result: `Ok` becomes a pure value, `Err` a raised error.
    pub fn from_result<E: Into<Error>>(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::pure(value),
            Err(error) => Self::raise_error(error),
        }
    }

    /// Defers the construction of an IO until it is run.
    ///
    /// Useful for recursive definitions: the recursion only unfolds as the
    /// run loop reaches it.
    pub fn suspend<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(Node::Suspend(Box::new(move || thunk().node)))
    }

    /// Alias of [`IO::suspend`].
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::suspend(thunk)
    }

    /// An async step with raw access to the execution's connection.
    ///
    /// `register` receives the ambient [`Connection`] and a [`Callback`]; it
    /// is responsible for pushing and popping its own cancel tokens.
    pub fn async_connected<F>(register: F) -> Self
    where
        F: FnOnce(Connection, Callback<A>) + Send + 'static,
    {
        Self::from_node(Node::Async(Box::new(move |connection, raw| {
            register(connection, Callback::new(raw));
        })))
    }

    /// An async step that can be interrupted.
    ///
    /// `register` starts the external operation and returns a token that
    /// aborts it. The token stays registered on the ambient connection while
    /// the step is pending; cancelling the execution runs it and resumes the
    /// run loop with a cancellation error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    /// use std::thread;
    ///
    /// let io = IO::cancelable(|callback| {
    ///     thread::spawn(move || callback.succeed(7));
    ///     IO::unit()
    /// });
    /// assert_eq!(io.run_sync().unwrap(), 7);
    /// ```
    pub fn cancelable<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A>) -> IO<()> + Send + 'static,
    {
        Self::from_node(Node::Async(Box::new(move |connection: Connection, raw| {
            let cell = Arc::new(CallbackCell::new(raw));
            let slot = Arc::new(Mutex::new(TokenSlot::Pending));

            let token_cell = Arc::clone(&cell);
            let token_slot = Arc::clone(&slot);
            connection.push(IO::suspend(move || {
                let token = match std::mem::replace(
                    &mut *token_slot.lock(),
                    TokenSlot::CancelRequested,
                ) {
                    TokenSlot::Token(token) => token,
                    TokenSlot::Pending | TokenSlot::CancelRequested => IO::unit(),
                };
                token.attempt().flat_map(move |result| {
                    if let Some(raw) = token_cell.take() {
                        raw(Err(Error::cancelled()));
                    }
                    IO::from_result(result)
                })
            }));

            let callback_cell = Arc::clone(&cell);
            let callback_connection = connection.clone();
            let callback = Callback::new(Box::new(move |result| {
                if let Some(raw) = callback_cell.take() {
                    drop(callback_connection.pop());
                    raw(result);
                }
            }));

            match algebra::guarded(move || register(callback)) {
                Ok(token) => {
                    let mut guard = slot.lock();
                    if matches!(*guard, TokenSlot::CancelRequested) {
                        drop(guard);
                        token.run_async(|result| {
                            if let Err(error) = result {
                                tracing::warn!(%error, "cancel token failed");
                            }
                        });
                    } else {
                        *guard = TokenSlot::Token(token);
                    }
                }
                Err(error) => {
                    if let Some(raw) = cell.take() {
                        drop(connection.pop());
                        raw(Err(error));
                    }
                }
            }
        })))
    }

    /// An async step completed by an external callback.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// let io = IO::from_callback(|callback| callback.succeed("ready"));
    /// assert_eq!(io.run_sync().unwrap(), "ready");
    /// ```
    pub fn from_callback<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A>) + Send + 'static,
    {
        Self::cancelable(move |callback| {
            register(callback);
            IO::unit()
        })
    }

    /// An async step that never completes; only cancellation ends it.
    pub fn never() -> Self {
        Self::from_callback(drop)
    }

    /// Stack-safe monadic loop.
    ///
    /// `step` is applied to the seed until it yields `Either::Right`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::control::Either;
    /// use lambars_fx::effect::IO;
    ///
    /// let sum = IO::tail_rec_m((0_u64, 0_u64), |(n, total)| {
    ///     IO::pure(if n > 100_000 {
    ///         Either::Right(total)
    ///     } else {
    ///         Either::Left((n + 1, total + n))
    ///     })
    /// });
    /// assert_eq!(sum.run_sync().unwrap(), 5_000_050_000);
    /// ```
    pub fn tail_rec_m<S, F>(seed: S, step: F) -> Self
    where
        S: Send + 'static,
        F: Fn(S) -> IO<Either<S, A>> + Send + Sync + 'static,
    {
        fn go<S, A, F>(state: S, step: Arc<F>) -> IO<A>
        where
            S: Send + 'static,
            A: Send + 'static,
            F: Fn(S) -> IO<Either<S, A>> + Send + Sync + 'static,
        {
            step(state).flat_map(move |next| match next {
                Either::Left(state) => go(state, step),
                Either::Right(value) => IO::pure(value),
            })
        }

        Self::suspend(move || go(seed, Arc::new(step)))
    }

    // =========================================================================
    // Combinators
    // =========================================================================

    /// Transforms the result.
    ///
    /// Consecutive maps are fused into a single step.
    pub fn map<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        IO::from_node(
            self.node
                .map(Box::new(move |value| erase(function(unerase::<A>(value))))),
        )
    }

    /// Alias of [`IO::map`].
    pub fn fmap<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        self.map(function)
    }

    /// Sequences another IO that depends on this result.
    pub fn flat_map<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> IO<B> + Send + 'static,
    {
        IO::from_node(self.node.bind(Frame::Bind(Box::new(move |value| {
            function(unerase::<A>(value)).node
        }))))
    }

    /// Alias of [`IO::flat_map`].
    pub fn and_then<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> IO<B> + Send + 'static,
    {
        self.flat_map(function)
    }

    /// Runs `next` after this IO, discarding this result.
    pub fn then<B>(self, next: IO<B>) -> IO<B>
    where
        B: Send + 'static,
    {
        self.flat_map(move |_| next)
    }

    /// Runs both IOs in sequence and combines their results.
    pub fn map2<B, C, F>(self, other: IO<B>, function: F) -> IO<C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |a| other.map(move |b| function(a, b)))
    }

    /// Runs both IOs in sequence and pairs their results.
    pub fn product<B>(self, other: IO<B>) -> IO<(A, B)>
    where
        B: Send + 'static,
    {
        self.map2(other, |a, b| (a, b))
    }

    /// Exposes a raised error as a value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// let io: IO<i32> = IO::raise_error("nope");
    /// let result = io.attempt().run_sync().unwrap();
    /// assert_eq!(result.unwrap_err().to_string(), "nope");
    /// ```
    pub fn attempt(self) -> IO<Result<A, Error>> {
        IO::from_node(self.node.bind(Frame::Fold {
            on_success: Box::new(|value| Node::Pure(erase(Ok::<A, Error>(unerase::<A>(value))))),
            on_error: Box::new(|error| Node::Pure(erase(Err::<A, Error>(error)))),
        }))
    }

    /// Recovers from a raised error with another IO.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// let io = IO::<i32>::raise_error("boom").handle_error_with(|_| IO::pure(0));
    /// assert_eq!(io.run_sync().unwrap(), 0);
    /// ```
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(Error) -> Self + Send + 'static,
    {
        Self::from_node(
            self.node
                .bind(Frame::Recover(Box::new(move |error| handler(error).node))),
        )
    }

    /// Recovers from a raised error with a value.
    pub fn handle_error<F>(self, handler: F) -> Self
    where
        F: FnOnce(Error) -> A + Send + 'static,
    {
        self.handle_error_with(move |error| Self::pure(handler(error)))
    }

    /// Transforms a raised error.
    pub fn map_err<F>(self, function: F) -> Self
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.handle_error_with(move |error| Self::raise_error(function(error)))
    }

    /// Folds both outcomes into a value.
    pub fn redeem<B, R, F>(self, recover: R, function: F) -> IO<B>
    where
        B: Send + 'static,
        R: FnOnce(Error) -> B + Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        self.redeem_with(
            move |error| IO::pure(recover(error)),
            move |value| IO::pure(function(value)),
        )
    }

    /// Folds both outcomes into another IO.
    pub fn redeem_with<B, R, F>(self, recover: R, bind: F) -> IO<B>
    where
        B: Send + 'static,
        R: FnOnce(Error) -> IO<B> + Send + 'static,
        F: FnOnce(A) -> IO<B> + Send + 'static,
    {
        IO::from_node(self.node.bind(Frame::Fold {
            on_success: Box::new(move |value| bind(unerase::<A>(value)).node),
            on_error: Box::new(move |error| recover(error).node),
        }))
    }

    /// Runs this IO with cancellation disabled.
    ///
    /// Cancel requests made while it runs take effect at the first step after
    /// the region ends.
    pub fn uncancelable(self) -> Self {
        Self::from_node(Node::Uncancelable(Child::new(self.node)))
    }

    // =========================================================================
    // Runners
    // =========================================================================

    /// Runs the IO without blocking.
    ///
    /// `callback` is invoked exactly once, on whichever thread completes the
    /// final step. The execution cannot be cancelled.
    pub fn run_async<F>(self, callback: F)
    where
        F: FnOnce(Result<A, Error>) + Send + 'static,
    {
        run_loop::start(
            self.node,
            Box::new(move |result| callback(result.map(unerase::<A>))),
        );
    }

    /// Runs the IO under a fresh connection and returns a handle that cancels
    /// it.
    ///
    /// When the handle cancels the execution, `callback` is not invoked.
    pub fn run_async_cancelable<F>(self, callback: F) -> Disposable
    where
        F: FnOnce(Result<A, Error>) + Send + 'static,
    {
        let connection = Connection::new();
        let observed = connection.clone();
        run_loop::start_cancelable(
            self.node,
            connection.clone(),
            Box::new(move |result| match result {
                Err(error) if error.is_cancelled() && observed.is_cancelled() => {
                    tracing::trace!("cancelled execution finished silently");
                }
                other => callback(other.map(unerase::<A>)),
            }),
        );
        Disposable { connection }
    }

    /// Runs the IO on the calling thread, blocking while an async step is
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns the error the computation raised.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::IO;
    ///
    /// assert_eq!(IO::delay(|| 1 + 1).run_sync().unwrap(), 2);
    /// ```
    pub fn run_sync(self) -> Result<A, Error> {
        let latch = Latch::new();
        let sink = Arc::clone(&latch);
        self.run_async(move |result| sink.set(result));
        latch.wait()
    }

    /// Like [`IO::run_sync`], but gives up after `limit`.
    ///
    /// On timeout the execution is cancelled and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the error the computation raised before the limit.
    pub fn run_timed(self, limit: Duration) -> Result<Option<A>, Error> {
        let latch = Latch::new();
        let sink = Arc::clone(&latch);
        let disposable = self.run_async_cancelable(move |result| sink.set(result));
        match latch.wait_for(limit) {
            Some(result) => result.map(Some),
            None => {
                disposable.dispose()?;
                Ok(None)
            }
        }
    }

    /// Runs the IO and returns its value.
    ///
    /// # Panics
    ///
    /// Panics with the error's message if the computation fails.
    pub fn run_unsafe(self) -> A {
        match self.run_sync() {
            Ok(value) => value,
            Err(error) => panic!("IO::run_unsafe failed: {error}"),
        }
    }
}

impl IO<()> {
    /// The IO that does nothing.
    pub fn unit() -> Self {
        Self::pure(())
    }
}

impl<A: Send + 'static> IO<IO<A>> {
    /// Runs the inner IO.
    pub fn flatten(self) -> IO<A> {
        self.flat_map(|inner| inner)
    }
}

/// The completion handle passed to async registrations.
///
/// Consumed on use, so a registration completes at most once.
pub struct Callback<A> {
    raw: RawCallback,
    _marker: PhantomData<fn(A)>,
}

impl<A: Send + 'static> Callback<A> {
    fn new(raw: RawCallback) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Completes the async step with `result`.
    pub fn complete(self, result: Result<A, Error>) {
        (self.raw)(result.map(erase));
    }

    /// Completes the async step with a value.
    pub fn succeed(self, value: A) {
        self.complete(Ok(value));
    }

    /// Completes the async step with an error.
    pub fn fail(self, error: impl Into<Error>) {
        self.complete(Err(error.into()));
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Callback(..)")
    }
}

/// Cancels an execution started with [`IO::run_async_cancelable`].
#[derive(Debug, Clone)]
pub struct Disposable {
    connection: Connection,
}

impl Disposable {
    /// Cancels the execution and waits for its cancel tokens.
    ///
    /// # Errors
    ///
    /// Returns the composed failure of the cancel tokens.
    pub fn dispose(&self) -> Result<(), Error> {
        self.connection.cancel().run_sync()
    }

    /// The cancellation as an effect.
    pub fn cancel(&self) -> IO<()> {
        self.connection.cancel()
    }

    /// Returns `true` once the execution was cancelled.
    pub fn is_disposed(&self) -> bool {
        self.connection.is_cancelled()
    }
}

struct CallbackCell(Mutex<Option<RawCallback>>);

impl CallbackCell {
    fn new(raw: RawCallback) -> Self {
        Self(Mutex::new(Some(raw)))
    }

    fn take(&self) -> Option<RawCallback> {
        self.0.lock().take()
    }
}

enum TokenSlot {
    Pending,
    Token(IO<()>),
    CancelRequested,
}
