//! Bridging between `IO` and Rust futures.
//!
//! - [`IO::from_future`] turns a future into an async step driven by the
//!   shared tokio runtime; cancelling the IO aborts the spawned task.
//! - `IO` implements [`IntoFuture`], so it can be awaited. The execution
//!   starts on first poll and dropping the future before it resolves cancels
//!   it.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::IO;
//!
//! #[tokio::main]
//! async fn main() {
//!     let io = IO::from_future(async { 40 }).map(|n| n + 2);
//!     assert_eq!(io.await.unwrap(), 42);
//! }
//! ```

use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use pin_project_lite::pin_project;

use super::error::Error;
use super::executor::runtime;
use super::io::{Disposable, IO};

impl<A: Send + 'static> IO<A> {
    /// Awaits `future` on the shared tokio runtime.
    ///
    /// A panic inside the future is raised as an [`Error`].
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        Self::cancelable(move |callback| {
            let task = runtime::handle().spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(value) => callback.succeed(value),
                    Err(payload) => callback.fail(Error::from_panic_payload(payload.as_ref())),
                }
            });
            IO::delay(move || task.abort())
        })
    }

    /// Awaits a fallible `future`; an `Err` is raised.
    pub fn from_try_future<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<A, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        IO::<Result<A, E>>::from_future(future)
            .flat_map(|result| Self::from_result(result.map_err(Error::new)))
    }
}

pin_project! {
    /// The future returned by awaiting an `IO`.
    ///
    /// Resolves to the IO's result. Dropping it before completion cancels the
    /// execution.
    pub struct IoFuture<A> {
        #[pin]
        receiver: oneshot::Receiver<Result<A, Error>>,
        pending: Option<(IO<A>, oneshot::Sender<Result<A, Error>>)>,
        disposable: Option<Disposable>,
        finished: bool,
    }

    impl<A> PinnedDrop for IoFuture<A> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if *this.finished {
                return;
            }
            if let Some(disposable) = this.disposable.take() {
                tracing::trace!("io future dropped before completion; cancelling");
                disposable.cancel().run_async(|result| {
                    if let Err(error) = result {
                        tracing::warn!(%error, "cancelling a dropped io future failed");
                    }
                });
            }
        }
    }
}

impl<A: Send + 'static> Future for IoFuture<A> {
    type Output = Result<A, Error>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some((io, sender)) = this.pending.take() {
            *this.disposable = Some(io.run_async_cancelable(move |result| {
                let _ = sender.send(result);
            }));
        }
        match this.receiver.poll(context) {
            Poll::Ready(received) => {
                *this.finished = true;
                Poll::Ready(received.unwrap_or_else(|_| Err(Error::cancelled())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<A: Send + 'static> IntoFuture for IO<A> {
    type Output = Result<A, Error>;
    type IntoFuture = IoFuture<A>;

    /// Starts the IO on first poll.
    ///
    /// The run loop executes on the polling thread until the first async
    /// step that does not complete at once; long blocking `delay` thunks
    /// should be started on an executor instead.
    fn into_future(self) -> IoFuture<A> {
        let (sender, receiver) = oneshot::channel();
        IoFuture {
            receiver,
            pending: Some((self, sender)),
            disposable: None,
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_await_pure() {
        assert_eq!(IO::pure(5).await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_await_raised_error() {
        let result = IO::<i32>::raise_error("failed").await;
        assert_eq!(result.unwrap_err().to_string(), "failed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_from_future_panic_is_raised() {
        let io: IO<i32> = IO::from_future(async { panic!("inside future") });
        assert!(io.await.unwrap_err().is_panic());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_from_try_future() {
        let io = IO::from_try_future(async { "7".parse::<i32>() });
        assert_eq!(io.await.unwrap(), 7);
    }
}
