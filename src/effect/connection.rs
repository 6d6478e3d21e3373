//! Cancellation connections.
//!
//! A [`Connection`] is the registry of cancel tokens belonging to one logical
//! execution. The run loop consults it before every step; async steps, bracket
//! resources and child fibers register their cleanup on it.
//!
//! # Lifecycle
//!
//! A connection starts *active*. [`Connection::cancel`] moves it to the
//! terminal *cancelled* state exactly once and runs every stored token in
//! reverse registration order. Tokens pushed after that run immediately, so a
//! registration is never lost.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::{Connection, IO};
//! use std::sync::{Arc, Mutex};
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let connection = Connection::new();
//!
//! for name in ["first", "second"] {
//!     let log = Arc::clone(&log);
//!     connection.push(IO::delay(move || log.lock().unwrap().push(name)));
//! }
//!
//! connection.cancel().run_sync().unwrap();
//! assert!(connection.is_cancelled());
//! assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::error::Error;
use super::io::IO;

/// An effect run when its connection is cancelled.
pub type CancelToken = IO<()>;

type Tokens = SmallVec<[CancelToken; 4]>;

struct Inner {
    cancelled: AtomicBool,
    /// `None` once cancelled.
    tokens: Mutex<Option<Tokens>>,
}

/// A thread-safe stack of cancel tokens for one execution.
///
/// Cloning a connection yields another handle to the same registry.
/// [`Connection::uncancelable`] is the degenerate connection used inside
/// uncancelable regions: it drops every pushed token and never reports
/// cancellation.
#[derive(Clone)]
pub struct Connection {
    inner: Option<Arc<Inner>>,
}

impl Connection {
    /// Creates an active connection with no tokens.
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                tokens: Mutex::new(Some(SmallVec::new())),
            })),
        }
    }

    /// The connection that can never be cancelled.
    pub const fn uncancelable() -> Self {
        Self { inner: None }
    }

    /// Returns `false` for [`Connection::uncancelable`].
    pub const fn is_cancelable(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns `true` once [`Connection::cancel`] has started running.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.cancelled.load(Ordering::Acquire))
    }

    /// Registers `token`.
    ///
    /// On an already cancelled connection the token is run immediately
    /// instead of being stored.
    pub fn push(&self, token: CancelToken) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut tokens = inner.tokens.lock();
        if let Some(stack) = tokens.as_mut() {
            stack.push(token);
            return;
        }
        drop(tokens);
        token.run_async(|result| {
            if let Err(error) = result {
                tracing::warn!(%error, "cancel token pushed after cancellation failed");
            }
        });
    }

    /// Registers a token that cancels both `left` and `right`.
    pub fn push_pair(&self, left: &Self, right: &Self) {
        let left = left.clone();
        let right = right.clone();
        self.push(IO::suspend(move || {
            cancel_all([left.cancel(), right.cancel()])
        }));
    }

    /// Removes and returns the most recently pushed token.
    ///
    /// Returns a no-op token when the stack is empty or the connection is
    /// cancelled.
    pub fn pop(&self) -> CancelToken {
        self.inner
            .as_ref()
            .and_then(|inner| inner.tokens.lock().as_mut().and_then(SmallVec::pop))
            .unwrap_or_else(IO::unit)
    }

    /// Cancels the connection.
    ///
    /// The returned effect takes every stored token, marks the connection
    /// cancelled and runs the tokens newest first. Every token is attempted
    /// even if an earlier one fails; the first failure is raised with later
    /// ones attached as suppressed. Running it again is a no-op.
    pub fn cancel(&self) -> IO<()> {
        let inner = self.inner.clone();
        IO::suspend(move || {
            let Some(inner) = inner else {
                return IO::unit();
            };
            let taken = {
                let mut tokens = inner.tokens.lock();
                inner.cancelled.store(true, Ordering::Release);
                tokens.take()
            };
            match taken {
                Some(tokens) => {
                    tracing::trace!(tokens = tokens.len(), "cancelling connection");
                    cancel_all(tokens.into_iter().rev())
                }
                None => IO::unit(),
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner
            .as_ref()
            .and_then(|inner| inner.tokens.lock().as_ref().map(SmallVec::len))
            .unwrap_or(0)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("cancelable", &self.is_cancelable())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Runs `tokens` in order, uncancelably, composing their failures.
pub(crate) fn cancel_all(tokens: impl IntoIterator<Item = CancelToken>) -> IO<()> {
    let mut chain: IO<Option<Error>> = IO::pure(None);
    for token in tokens {
        chain = chain.flat_map(move |first| {
            token.attempt().map(move |result| match (first, result) {
                (first, Ok(())) => first,
                (None, Err(error)) => Some(error),
                (Some(first), Err(error)) => {
                    tracing::warn!(%error, "cancel token failed while another failure is pending");
                    Some(first.with_suppressed(error))
                }
            })
        });
    }
    chain
        .flat_map(|failure| failure.map_or_else(IO::unit, IO::raise_error))
        .uncancelable()
}
