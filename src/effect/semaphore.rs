//! A counting semaphore whose operations are IO values.
//!
//! Waiters are served first come, first served. A release hands permits to
//! the oldest waiter even when it cannot satisfy it completely, so a large
//! request is never starved by a stream of small ones.
//!
//! Acquiring is uncancelable: a waiting acquire runs until it gets its
//! permits. [`Semaphore::with_permit`] brackets the permit, so the permit
//! is returned on every exit path.
//!
//! # Examples
//!
//! ```rust
//! use lambars_fx::effect::{IO, Semaphore};
//!
//! let semaphore = Semaphore::new(2);
//! let guarded = semaphore.with_permit(IO::delay(|| "inside"));
//!
//! assert_eq!(guarded.run_sync().unwrap(), "inside");
//! assert_eq!(semaphore.available().run_sync().unwrap(), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::io::{Callback, IO};

struct Waiter {
    /// Permits still missing.
    remaining: u64,
    callback: Callback<()>,
}

#[derive(Default)]
struct State {
    /// Zero whenever `waiting` is non-empty.
    available: u64,
    waiting: VecDeque<Waiter>,
}

impl State {
    fn release(&mut self, permits: u64) -> Vec<Callback<()>> {
        let mut left = permits;
        let mut granted = Vec::new();
        while left > 0 {
            let Some(front) = self.waiting.front_mut() else {
                break;
            };
            if front.remaining > left {
                front.remaining -= left;
                left = 0;
            } else {
                left -= front.remaining;
                if let Some(waiter) = self.waiting.pop_front() {
                    granted.push(waiter.callback);
                }
            }
        }
        self.available += left;
        granted
    }
}

/// A shared pool of permits.
#[derive(Clone, Default)]
pub struct Semaphore {
    state: Arc<Mutex<State>>,
}

impl Semaphore {
    /// Creates a semaphore holding `permits`.
    pub fn new(permits: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: permits,
                waiting: VecDeque::new(),
            })),
        }
    }

    /// Permits that can be acquired right now.
    pub fn available(&self) -> IO<u64> {
        let state = Arc::clone(&self.state);
        IO::delay(move || state.lock().available)
    }

    /// Available permits, or minus the permits waiters still need.
    pub fn count(&self) -> IO<i64> {
        let state = Arc::clone(&self.state);
        IO::delay(move || {
            let state = state.lock();
            if state.waiting.is_empty() {
                i64::try_from(state.available).unwrap_or(i64::MAX)
            } else {
                let missing: u64 = state.waiting.iter().map(|waiter| waiter.remaining).sum();
                i64::try_from(missing).map_or(i64::MIN, |missing| -missing)
            }
        })
    }

    /// Waits until `permits` are acquired.
    pub fn acquire_n(&self, permits: u64) -> IO<()> {
        let state = Arc::clone(&self.state);
        IO::<()>::from_callback(move |callback| {
            let mut state = state.lock();
            if permits == 0 || (state.waiting.is_empty() && state.available >= permits) {
                state.available -= permits;
                drop(state);
                callback.succeed(());
                return;
            }
            let remaining = permits - state.available;
            state.available = 0;
            state.waiting.push_back(Waiter {
                remaining,
                callback,
            });
        })
        .uncancelable()
    }

    /// Waits for one permit.
    pub fn acquire(&self) -> IO<()> {
        self.acquire_n(1)
    }

    /// Acquires `permits` if they are available without waiting.
    pub fn try_acquire_n(&self, permits: u64) -> IO<bool> {
        let state = Arc::clone(&self.state);
        IO::delay(move || {
            let mut state = state.lock();
            if state.waiting.is_empty() && state.available >= permits {
                state.available -= permits;
                true
            } else {
                permits == 0
            }
        })
    }

    /// Returns `permits`, waking the waiters they complete.
    pub fn release_n(&self, permits: u64) -> IO<()> {
        let state = Arc::clone(&self.state);
        IO::delay(move || {
            let granted = state.lock().release(permits);
            if !granted.is_empty() {
                tracing::trace!(waiters = granted.len(), "semaphore permits granted");
            }
            for callback in granted {
                callback.succeed(());
            }
        })
    }

    /// Returns one permit.
    pub fn release(&self) -> IO<()> {
        self.release_n(1)
    }

    /// Runs `io` holding one permit.
    pub fn with_permit<A: Send + 'static>(&self, io: IO<A>) -> IO<A> {
        let semaphore = self.clone();
        IO::bracket(self.acquire(), move |()| io, move |()| semaphore.release())
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("Semaphore")
            .field("available", &state.available)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
