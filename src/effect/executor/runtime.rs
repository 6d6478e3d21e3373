//! Shared tokio runtime for the `async` feature.
//!
//! A lazily-initialized multi-thread runtime backs [`TokioExecutor`],
//! `IO::sleep` and `IO::from_future` when the caller is not already inside a
//! runtime. When inside one, its handle is preferred so tracing context and
//! runtime settings are preserved.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::executor::runtime::{global, handle};
//!
//! let value = global().block_on(async { 21 * 2 });
//! assert_eq!(value, 42);
//!
//! let obtained_handle = handle();
//! let _ = obtained_handle.spawn(async {});
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::LazyLock;

use tokio::runtime::{Handle, Runtime};

use super::config::RuntimeConfig;
use super::{Executor, Task};

// =============================================================================
// Global Runtime
// =============================================================================

/// Global tokio runtime initialized lazily on first access.
///
/// Configured from [`RuntimeConfig::from_env`]; an invalid environment falls
/// back to the defaults. The runtime has static lifetime and is never dropped.
static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    let config = RuntimeConfig::from_env().unwrap_or_else(|error| {
        tracing::warn!(%error, "ignoring invalid runtime configuration");
        RuntimeConfig::default()
    });
    config
        .build_runtime()
        .expect("Failed to create global tokio runtime")
});

/// Returns a reference to the global runtime.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

// =============================================================================
// Handle Caching
// =============================================================================

thread_local! {
    /// Thread-local cached handle to the global runtime.
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Returns a handle to the current or global runtime.
///
/// # Handle Priority
///
/// 1. If inside a tokio runtime: returns `Handle::current()`
/// 2. Otherwise: returns the cached `global().handle()`
#[inline]
#[must_use]
pub fn handle() -> Handle {
    if let Ok(current_handle) = Handle::try_current() {
        return current_handle;
    }

    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| global().handle().clone())
            .clone()
    })
}

// =============================================================================
// Executor
// =============================================================================

/// Runs tasks on the blocking pool of a tokio runtime.
///
/// The blocking pool is used because a task may block inside a `delay`
/// thunk.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Uses the current runtime, or the global one outside a runtime.
    pub fn new() -> Self {
        Self::from_handle(handle())
    }

    /// Uses the runtime behind `handle`.
    pub const fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// This executor behind an [`Arc`](std::sync::Arc).
    pub fn shared(self) -> super::SharedExecutor {
        std::sync::Arc::new(self)
    }
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokioExecutor")
            .field("runtime_flavor", &self.handle.runtime_flavor())
            .finish()
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}
