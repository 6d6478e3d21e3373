//! # lambars-fx
//!
//! A lazy, stack-safe, cancellable effect runtime for Rust.
//!
//! ## Overview
//!
//! - **IO**: a lazily evaluated description of a computation, interpreted by
//!   a trampolined run loop
//! - **Cancellation**: connections of cancel tokens, uncancelable regions
//! - **Resources**: `bracket`, `bracket_case`, `guarantee`
//! - **Fibers**: started computations that can be joined or cancelled, and
//!   an await-join scope that bounds their lifetime
//! - **Coordination**: a first-come, first-served `Semaphore`
//! - **Interop**: awaiting an `IO` as a future and lifting futures into `IO`
//!
//! ## Feature Flags
//!
//! - `control`: Control structures (`Either`)
//! - `effect`: The IO runtime, executors and fibers
//! - `async`: tokio-backed executor, `sleep`, `timeout` and future interop
//! - `full`: Enable all features
//!
//! ## Example
//!
//! ```rust
//! use lambars_fx::prelude::*;
//!
//! let io = IO::pure(10)
//!     .map(|x| x * 2)
//!     .flat_map(|x| IO::delay(move || x + 1));
//!
//! assert_eq!(io.run_sync().unwrap(), 21);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use lambars_fx::prelude::*;
/// ```
pub mod prelude {
    #[cfg(feature = "control")]
    pub use crate::control::*;

    #[cfg(feature = "effect")]
    pub use crate::effect::*;
}

#[cfg(feature = "control")]
pub mod control;

#[cfg(feature = "effect")]
pub mod effect;

#[cfg(feature = "effect")]
mod assertions {
    use crate::effect::{Connection, Error, Fiber, IO, Scope, Semaphore, SharedExecutor};
    use static_assertions::assert_impl_all;

    assert_impl_all!(IO<i32>: Send);
    assert_impl_all!(IO<String>: Send);
    assert_impl_all!(Connection: Send, Sync, Clone);
    assert_impl_all!(Error: Send, Sync, Clone, std::error::Error);
    assert_impl_all!(Fiber<i32>: Send, Sync, Clone);
    assert_impl_all!(Scope: Send, Sync, Clone);
    assert_impl_all!(Semaphore: Send, Sync, Clone);
    assert_impl_all!(SharedExecutor: Send, Sync);
}
