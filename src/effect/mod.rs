//! Lazy, stack-safe, cancellable effects.
//!
//! An [`IO`] is a description of a computation. Nothing happens until one of
//! the runners ([`IO::run_async`], [`IO::run_sync`], ...) interprets it.
//! Interpretation is trampolined, so arbitrarily deep chains of `map` and
//! `flat_map` run in constant stack.
//!
//! # Cancellation
//!
//! Every execution carries a [`Connection`]: a stack of cancel tokens pushed
//! by async steps and resource releases. Cancelling the connection runs the
//! tokens newest first and stops the run loop at its next step. Regions marked
//! [`IO::uncancelable`] are not interrupted.
//!
//! # Resources
//!
//! [`IO::bracket_case`] acquires a resource, uses it, and releases it exactly
//! once with the [`ExitCase`] of the use: completed, failed or cancelled.
//!
//! # Concurrency
//!
//! - [`IO::start`] runs an IO as a [`Fiber`] on an [`Executor`].
//! - [`await_join_scope`] ties spawned tasks to a lexical scope.
//! - `race`, `race_pair` and `par_map2` compose two executions.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use lambars_fx::effect::{ExitCase, IO};
//!
//! let released = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&released);
//!
//! let io = IO::bracket_case(
//!     IO::delay(|| 10),
//!     |n| IO::pure(n * 2),
//!     move |_, exit| {
//!         assert!(exit.is_completed());
//!         IO::delay(move || flag.store(true, Ordering::SeqCst))
//!     },
//! );
//!
//! assert_eq!(io.run_sync().unwrap(), 20);
//! assert!(released.load(Ordering::SeqCst));
//! ```

// =============================================================================
// Outcomes and Errors
// =============================================================================

mod error;
mod exit;

pub use error::{Cause, Error, TimeoutError};
pub use exit::{ExitCase, Outcome};

// =============================================================================
// IO and Cancellation
// =============================================================================

pub mod connection;
mod io;

pub use connection::{CancelToken, Connection};
pub use io::{Callback, Disposable, IO};

// =============================================================================
// Executors and Fibers
// =============================================================================

pub mod executor;
pub mod fiber;

pub use executor::config::{ConfigError, RuntimeConfig};
pub use executor::{Executor, ImmediateExecutor, SharedExecutor, Task, ThreadExecutor};
pub use fiber::scope::{Deferred, Scope, await_join_scope};
pub use fiber::{Fiber, FiberId};

// =============================================================================
// Coordination
// =============================================================================

mod semaphore;

pub use semaphore::Semaphore;

// =============================================================================
// Future Interop (requires async feature)
// =============================================================================

#[cfg(feature = "async")]
mod future;

#[cfg(feature = "async")]
pub use executor::runtime::TokioExecutor;
#[cfg(feature = "async")]
pub use future::IoFuture;
