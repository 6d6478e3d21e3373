// =============================================================================
// Concurrency Combinators
// =============================================================================
//
// Each combinator forks its operands onto an executor under child
// connections. The parent connection holds one token that cancels both
// children (`Connection::push_pair`); it is popped once the combinator
// settles, so cancelling the parent afterwards no longer reaches them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::super::connection::{Connection, cancel_all};
use super::super::error::Error;
use super::super::executor::SharedExecutor;
use super::super::exit::Outcome;
use super::super::fiber::Fiber;
use super::algebra::unerase;
use super::{Callback, IO, run_loop};
use crate::control::Either;

/// A callback shared by two racing completions; the first taker wins.
struct SharedCallback<A>(Mutex<Option<Callback<A>>>);

impl<A> SharedCallback<A> {
    fn new(callback: Callback<A>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(callback))))
    }

    fn take(&self) -> Option<Callback<A>> {
        self.0.lock().take()
    }
}

/// Runs `io` on `executor` under `connection`, delivering its typed result.
fn fork<A, F>(io: IO<A>, connection: Connection, executor: &SharedExecutor, on_result: F)
where
    A: Send + 'static,
    F: FnOnce(Result<A, Error>) + Send + 'static,
{
    let node = io.into_node();
    executor.execute(Box::new(move || {
        run_loop::start_cancelable(
            node,
            connection,
            Box::new(move |result| on_result(result.map(unerase::<A>))),
        );
    }));
}

/// Cancels `loser`, then completes `callback` with `result`.
///
/// A failure of the cancellation is attached to an error result as
/// suppressed, or raised in place of a successful one.
fn settle<A: Send + 'static>(loser: &Connection, result: Result<A, Error>, callback: Callback<A>) {
    loser.cancel().run_async(move |cancelled| {
        let result = match (result, cancelled) {
            (result, Ok(())) => result,
            (Err(error), Err(cancel_error)) => Err(error.with_suppressed(cancel_error)),
            (Ok(_), Err(cancel_error)) => Err(cancel_error),
        };
        callback.complete(result);
    });
}

impl<A: Send + 'static> IO<A> {
    /// Runs both IOs concurrently; the first to finish wins.
    ///
    /// The loser is cancelled before the result is delivered. If the first to
    /// finish failed, the other is cancelled and the error raised. Cancelling
    /// the race cancels both sides.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::control::Either;
    /// use lambars_fx::effect::{IO, ThreadExecutor};
    ///
    /// let winner = IO::race(IO::pure(1), IO::<&str>::never(), ThreadExecutor::new().shared());
    /// assert_eq!(winner.run_sync().unwrap(), Either::Left(1));
    /// ```
    pub fn race<B>(left: Self, right: IO<B>, executor: SharedExecutor) -> IO<Either<A, B>>
    where
        B: Send + 'static,
    {
        IO::async_connected(move |parent: Connection, callback: Callback<Either<A, B>>| {
            let left_connection = Connection::new();
            let right_connection = Connection::new();
            parent.push_pair(&left_connection, &right_connection);

            let settled = Arc::new(AtomicBool::new(false));
            let callback = SharedCallback::new(callback);

            let (on_left, on_right) = {
                let settled_right = Arc::clone(&settled);
                let callback_right = Arc::clone(&callback);
                let parent_right = parent.clone();
                let loser_of_left = right_connection.clone();
                let loser_of_right = left_connection.clone();
                (
                    move |result: Result<A, Error>| {
                        if settled.swap(true, Ordering::AcqRel) {
                            return;
                        }
                        drop(parent.pop());
                        if let Some(callback) = callback.take() {
                            settle(&loser_of_left, result.map(Either::Left), callback);
                        }
                    },
                    move |result: Result<B, Error>| {
                        if settled_right.swap(true, Ordering::AcqRel) {
                            return;
                        }
                        drop(parent_right.pop());
                        if let Some(callback) = callback_right.take() {
                            settle(&loser_of_right, result.map(Either::Right), callback);
                        }
                    },
                )
            };

            fork(left, left_connection, &executor, on_left);
            fork(right, right_connection, &executor, on_right);
        })
    }

    /// Runs both IOs in parallel and combines their results.
    ///
    /// If either side fails, the other is cancelled and the error raised.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::{IO, ThreadExecutor};
    ///
    /// let sum = IO::par_map2(
    ///     IO::delay(|| 20),
    ///     IO::delay(|| 22),
    ///     ThreadExecutor::new().shared(),
    ///     |a, b| a + b,
    /// );
    /// assert_eq!(sum.run_sync().unwrap(), 42);
    /// ```
    pub fn par_map2<B, C, F>(
        left: Self,
        right: IO<B>,
        executor: SharedExecutor,
        function: F,
    ) -> IO<C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        IO::<(A, B)>::async_connected(move |parent: Connection, callback| {
            let left_connection = Connection::new();
            let right_connection = Connection::new();
            parent.push_pair(&left_connection, &right_connection);

            let state: Arc<Mutex<PairState<A, B>>> = Arc::new(Mutex::new(PairState::default()));
            let callback = SharedCallback::new(callback);

            let on_left = {
                let state = Arc::clone(&state);
                let callback = Arc::clone(&callback);
                let parent = parent.clone();
                let other = right_connection.clone();
                move |result: Result<A, Error>| {
                    let step = state.lock().offer_left(result);
                    finish_pair(step, &parent, &other, &callback);
                }
            };
            let on_right = {
                let other = left_connection.clone();
                move |result: Result<B, Error>| {
                    let step = state.lock().offer_right(result);
                    finish_pair(step, &parent, &other, &callback);
                }
            };

            fork(left, left_connection, &executor, on_left);
            fork(right, right_connection, &executor, on_right);
        })
        .map(move |(a, b)| function(a, b))
    }
}

impl<A: Clone + Send + 'static> IO<A> {
    /// Like [`IO::race`], but the loser keeps running and is returned as a
    /// fiber.
    ///
    /// If the first to finish failed or was cancelled, the other is
    /// cancelled and the error raised.
    pub fn race_pair<B>(
        left: Self,
        right: IO<B>,
        executor: SharedExecutor,
    ) -> IO<Either<(A, Fiber<B>), (Fiber<A>, B)>>
    where
        B: Clone + Send + 'static,
    {
        IO::async_connected(move |parent: Connection, callback| {
            let left_fiber = Fiber::spawn(left, &executor);
            let right_fiber = Fiber::spawn(right, &executor);
            {
                let (left_fiber, right_fiber) = (left_fiber.clone(), right_fiber.clone());
                parent.push(IO::suspend(move || {
                    cancel_all([left_fiber.cancel(), right_fiber.cancel()])
                }));
            }

            let settled = Arc::new(AtomicBool::new(false));
            let callback = SharedCallback::new(callback);

            let on_left = {
                let settled = Arc::clone(&settled);
                let callback = Arc::clone(&callback);
                let parent = parent.clone();
                let other = right_fiber.clone();
                move |outcome: Outcome<A>| {
                    if settled.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    drop(parent.pop());
                    if let Some(callback) = callback.take() {
                        finish_race_pair(outcome, other, Either::Left, callback);
                    }
                }
            };
            let on_right = {
                let other = left_fiber.clone();
                move |outcome: Outcome<B>| {
                    if settled.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    drop(parent.pop());
                    if let Some(callback) = callback.take() {
                        finish_race_pair(outcome, other, |(b, fiber)| Either::Right((fiber, b)), callback);
                    }
                }
            };

            left_fiber.listen(on_left);
            right_fiber.listen(on_right);
        })
    }
}

fn finish_race_pair<W, L, R, F>(
    outcome: Outcome<W>,
    loser: Fiber<L>,
    wrap: F,
    callback: Callback<R>,
) where
    W: Send + 'static,
    L: Clone + Send + 'static,
    R: Send + 'static,
    F: FnOnce((W, Fiber<L>)) -> R + Send + 'static,
{
    match outcome {
        Outcome::Completed(value) => callback.succeed(wrap((value, loser))),
        Outcome::Errored(error) => {
            loser.cancel().run_async(move |cancelled| {
                callback.fail(match cancelled {
                    Ok(()) => error,
                    Err(cancel_error) => error.with_suppressed(cancel_error),
                });
            });
        }
        Outcome::Cancelled => {
            loser.cancel().run_async(move |_| callback.fail(Error::cancelled()));
        }
    }
}

struct PairState<A, B> {
    left: Option<A>,
    right: Option<B>,
    done: bool,
}

impl<A, B> Default for PairState<A, B> {
    fn default() -> Self {
        Self {
            left: None,
            right: None,
            done: false,
        }
    }
}

enum PairStep<A, B> {
    Wait,
    Both(A, B),
    Failed(Error),
}

impl<A, B> PairState<A, B> {
    fn offer_left(&mut self, result: Result<A, Error>) -> PairStep<A, B> {
        if self.done {
            return PairStep::Wait;
        }
        match result {
            Ok(value) => match self.right.take() {
                Some(right) => {
                    self.done = true;
                    PairStep::Both(value, right)
                }
                None => {
                    self.left = Some(value);
                    PairStep::Wait
                }
            },
            Err(error) => {
                self.done = true;
                PairStep::Failed(error)
            }
        }
    }

    fn offer_right(&mut self, result: Result<B, Error>) -> PairStep<A, B> {
        if self.done {
            return PairStep::Wait;
        }
        match result {
            Ok(value) => match self.left.take() {
                Some(left) => {
                    self.done = true;
                    PairStep::Both(left, value)
                }
                None => {
                    self.right = Some(value);
                    PairStep::Wait
                }
            },
            Err(error) => {
                self.done = true;
                PairStep::Failed(error)
            }
        }
    }
}

fn finish_pair<A, B>(
    step: PairStep<A, B>,
    parent: &Connection,
    other: &Connection,
    callback: &SharedCallback<(A, B)>,
) where
    A: Send + 'static,
    B: Send + 'static,
{
    match step {
        PairStep::Wait => {}
        PairStep::Both(left, right) => {
            drop(parent.pop());
            if let Some(callback) = callback.take() {
                callback.succeed((left, right));
            }
        }
        PairStep::Failed(error) => {
            drop(parent.pop());
            if let Some(callback) = callback.take() {
                settle(other, Err(error), callback);
            }
        }
    }
}

impl IO<()> {
    /// Resumes the execution on a thread chosen by `executor`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::{IO, RuntimeConfig, ThreadExecutor};
    ///
    /// let executor =
    ///     ThreadExecutor::with_config(&RuntimeConfig::default().with_thread_name("io")).shared();
    /// let name = IO::shift(executor).map(|()| std::thread::current().name().map(str::to_owned));
    ///
    /// assert!(name.run_sync().unwrap().unwrap().starts_with("io"));
    /// ```
    pub fn shift(executor: SharedExecutor) -> Self {
        Self::from_callback(move |callback| {
            executor.execute(Box::new(move || callback.succeed(())));
        })
    }
}

impl<A: Send + 'static> IO<A> {
    /// Runs this IO, then continues the rest of the chain on `executor`.
    pub fn continue_on(self, executor: SharedExecutor) -> Self {
        self.flat_map(move |value| IO::shift(executor).map(move |()| value))
    }
}

#[cfg(feature = "async")]
impl IO<()> {
    /// Completes after `duration`, using the shared tokio runtime's timer.
    ///
    /// Cancelling the sleep aborts the timer.
    pub fn sleep(duration: std::time::Duration) -> Self {
        Self::cancelable(move |callback| {
            let timer = super::super::executor::runtime::handle().spawn(async move {
                tokio::time::sleep(duration).await;
                callback.succeed(());
            });
            IO::delay(move || timer.abort())
        })
    }
}

#[cfg(feature = "async")]
impl<A: Send + 'static> IO<A> {
    /// Fails with a [`TimeoutError`](super::super::error::TimeoutError) if
    /// this IO does not finish within `duration`.
    ///
    /// The IO is raced against [`IO::sleep`]; whichever loses is cancelled.
    pub fn timeout(self, duration: std::time::Duration, executor: SharedExecutor) -> Self {
        IO::race(self, IO::sleep(duration), executor).flat_map(move |winner| match winner {
            Either::Left(value) => Self::pure(value),
            Either::Right(()) => Self::raise_error(super::super::error::TimeoutError {
                after: duration,
            }),
        })
    }
}
