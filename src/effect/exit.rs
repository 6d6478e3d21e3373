//! How a computation finished.
//!
//! [`ExitCase`] is handed to bracket release actions so they can pick their
//! cleanup behaviour. [`Outcome`] is the three-way result published by a
//! fiber, where cancellation is a distinct termination rather than an error
//! value.

use super::error::Error;

/// How the `use` part of a bracket finished.
///
/// # Examples
///
/// ```rust
/// use lambars_fx::effect::{ExitCase, IO};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(None));
/// let recorder = Arc::clone(&seen);
///
/// let io = IO::pure(5).guarantee_case(move |exit| {
///     IO::delay(move || *recorder.lock().unwrap() = Some(exit.is_completed()))
/// });
///
/// assert_eq!(io.run_sync().unwrap(), 5);
/// assert_eq!(*seen.lock().unwrap(), Some(true));
/// ```
#[derive(Debug, Clone)]
pub enum ExitCase {
    /// `use` produced a value.
    Completed,
    /// `use` raised an error.
    Error(Error),
    /// The execution was cancelled while `use` was running.
    Cancelled,
}

impl ExitCase {
    /// Returns `true` for [`ExitCase::Completed`].
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` for [`ExitCase::Error`].
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns `true` for [`ExitCase::Cancelled`].
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The final result of an independently started execution.
#[derive(Debug, Clone)]
pub enum Outcome<A> {
    /// The execution produced a value.
    Completed(A),
    /// The execution raised an error.
    Errored(Error),
    /// The execution was cancelled before it could finish.
    Cancelled,
}

impl<A> Outcome<A> {
    /// Classifies a run-loop result.
    ///
    /// A cancellation error becomes [`Outcome::Cancelled`].
    pub fn from_result(result: Result<A, Error>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(error) if error.is_cancelled() => Self::Cancelled,
            Err(error) => Self::Errored(error),
        }
    }

    /// Converts back into a result, reporting cancellation as
    /// [`Error::cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the raised error, or a cancellation error.
    pub fn into_result(self) -> Result<A, Error> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Errored(error) => Err(error),
            Self::Cancelled => Err(Error::cancelled()),
        }
    }

    /// Maps the completed value.
    pub fn map<B, F>(self, function: F) -> Outcome<B>
    where
        F: FnOnce(A) -> B,
    {
        match self {
            Self::Completed(value) => Outcome::Completed(function(value)),
            Self::Errored(error) => Outcome::Errored(error),
            Self::Cancelled => Outcome::Cancelled,
        }
    }

    /// Returns `true` for [`Outcome::Cancelled`].
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`Outcome::Completed`].
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_cancelled_error() {
        let outcome: Outcome<i32> = Outcome::from_result(Err(Error::cancelled()));
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn test_outcome_from_error() {
        let outcome: Outcome<i32> = Outcome::from_result(Err(Error::msg("x")));
        assert!(matches!(outcome, Outcome::Errored(_)));
    }

    #[test]
    fn test_outcome_round_trip_value() {
        let outcome = Outcome::from_result(Ok::<_, Error>(3)).map(|n| n * 2);
        assert_eq!(outcome.into_result().unwrap(), 6);
    }

    #[test]
    fn test_cancelled_into_result() {
        let result = Outcome::<()>::Cancelled.into_result();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_exit_case_predicates() {
        assert!(ExitCase::Completed.is_completed());
        assert!(ExitCase::Error(Error::msg("e")).is_error());
        assert!(ExitCase::Cancelled.is_cancelled());
    }
}
