//! Error types for the effect runtime.
//!
//! A raised error travels through the algebra as a value ([`Error`]) and is
//! recoverable with `handle_error_with` / `attempt`. Cancellation and panics
//! captured from user closures are carried by the same type, tagged by their
//! [`Cause`], so that every boundary (`run_sync`, `run_async`, `Fiber::join`)
//! reports a single error type.
//!
//! # Suppressed Errors
//!
//! When a bracket release fails while another error is already unwinding, the
//! release error is attached to the original as *suppressed* context instead
//! of replacing it:
//!
//! ```rust
//! use lambars_fx::effect::Error;
//!
//! let original = Error::msg("use failed");
//! let release = Error::msg("release failed");
//! let composed = original.with_suppressed(release);
//!
//! assert_eq!(composed.to_string(), "use failed (suppressed: release failed)");
//! assert_eq!(composed.suppressed().len(), 1);
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Raised by `IO::timeout` when the guarded computation does not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("computation timed out after {after:?}")]
pub struct TimeoutError {
    /// The duration that elapsed before the computation was abandoned.
    pub after: Duration,
}

/// The reason an effect failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Cause {
    /// An arbitrary error value raised by user code.
    #[error(transparent)]
    Failure(Box<dyn StdError + Send + Sync + 'static>),

    /// A plain message raised by user code.
    #[error("{0}")]
    Message(String),

    /// A panic captured while running a user closure.
    #[error("panicked: {0}")]
    Panic(String),

    /// The execution was cancelled through its connection.
    #[error("execution was cancelled")]
    Cancelled,

    /// The computation exceeded its time limit.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// A failure flowing through an `IO` computation.
///
/// `Error` is cheap to clone: the cause is shared behind an `Arc`, so the same
/// failure can be delivered to every joiner of a fiber.
#[derive(Clone)]
pub struct Error {
    cause: Arc<Cause>,
    suppressed: Vec<Error>,
}

impl Error {
    /// Wraps an arbitrary error value.
    ///
    /// Wrapping an `Error` returns it unchanged instead of nesting it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_fx::effect::Error;
    ///
    /// let error = Error::new(std::io::Error::other("disk full"));
    /// assert_eq!(error.to_string(), "disk full");
    /// assert!(error.downcast_ref::<std::io::Error>().is_some());
    /// ```
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = Box::new(error);
        match boxed.downcast::<Self>() {
            Ok(already) => *already,
            Err(other) => Self::from_cause(Cause::Failure(other)),
        }
    }

    /// Creates an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::from_cause(Cause::Message(message.into()))
    }

    /// The error every boundary reports for a cancelled execution.
    pub fn cancelled() -> Self {
        Self::from_cause(Cause::Cancelled)
    }

    /// Creates an error describing a captured panic.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::from_cause(Cause::Panic(message.into()))
    }

    /// Creates an error from its cause.
    pub fn from_cause(cause: Cause) -> Self {
        Self {
            cause: Arc::new(cause),
            suppressed: Vec::new(),
        }
    }

    /// Converts a payload caught by `catch_unwind` into an error.
    pub(crate) fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(string) = payload.downcast_ref::<&str>() {
            (*string).to_string()
        } else if let Some(string) = payload.downcast_ref::<String>() {
            string.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::panic(message)
    }

    /// Returns this error with `other` recorded as suppressed context.
    ///
    /// The receiver stays the primary cause; suppressed errors keep the order
    /// in which they were attached.
    #[must_use]
    pub fn with_suppressed(mut self, other: Self) -> Self {
        self.suppressed.push(other);
        self
    }

    /// The primary cause.
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Errors recorded while this one was unwinding, oldest first.
    pub fn suppressed(&self) -> &[Self] {
        &self.suppressed
    }

    /// Returns `true` if this error reports a cancelled execution.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.cause, Cause::Cancelled)
    }

    /// Returns `true` if this error was produced by a captured panic.
    pub fn is_panic(&self) -> bool {
        matches!(*self.cause, Cause::Panic(_))
    }

    /// Returns `true` if this error was raised by a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(*self.cause, Cause::Timeout(_))
    }

    /// Attempts to view the wrapped error value as `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match &*self.cause {
            Cause::Failure(inner) => inner.downcast_ref::<E>(),
            Cause::Timeout(timeout) => (timeout as &dyn StdError).downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.cause)?;
        if !self.suppressed.is_empty() {
            write!(formatter, " (suppressed: ")?;
            for (index, suppressed) in self.suppressed.iter().enumerate() {
                if index > 0 {
                    write!(formatter, "; ")?;
                }
                write!(formatter, "{suppressed}")?;
            }
            write!(formatter, ")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Error")
            .field("cause", &self.cause)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &*self.cause {
            Cause::Failure(inner) => inner.source(),
            _ => None,
        }
    }
}

impl From<Cause> for Error {
    fn from(cause: Cause) -> Self {
        Self::from_cause(cause)
    }
}

impl From<TimeoutError> for Error {
    fn from(error: TimeoutError) -> Self {
        Self::from_cause(Cause::Timeout(error))
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::new(error)
    }
}
