//! The trampolined interpreter.
//!
//! [`run`] drives a [`Node`] with an explicit continuation stack, so the
//! native stack depth stays constant however deep the chain of binds, maps
//! and error handlers is. The only place the loop leaves its frame is an
//! async step whose callback has not fired yet: the loop state is parked in
//! an [`AsyncBoundary`] and the thread that fires the callback picks it up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use super::super::connection::Connection;
use super::super::error::Error;
use super::algebra::{Frame, Node, RawCallback, Register, Value, guarded};

type Stack = SmallVec<[Frame; 16]>;

/// Everything an execution owns besides the node being interpreted.
struct LoopState {
    connection: Connection,
    stack: Stack,
    callback: RawCallback,
}

enum Step {
    Continue(Node),
    Done(Result<Value, Error>),
}

/// Runs `node` to completion with cancellation disabled.
pub fn start(node: Node, callback: RawCallback) {
    start_cancelable(node, Connection::uncancelable(), callback);
}

/// Runs `node` under `connection`.
///
/// Returns once the execution completes or parks at an async step; the
/// callback is invoked exactly once either way.
pub fn start_cancelable(node: Node, connection: Connection, callback: RawCallback) {
    run(
        node,
        LoopState {
            connection,
            stack: SmallVec::new(),
            callback,
        },
    );
}

fn run(mut current: Node, mut state: LoopState) {
    loop {
        if state.connection.is_cancelled() {
            (state.callback)(Err(Error::cancelled()));
            return;
        }

        let step = match current {
            Node::Pure(value) => unwind(Ok(value), &mut state),
            Node::RaiseError(error) => unwind(Err(error), &mut state),
            Node::Delay(thunk) => unwind(guarded(thunk).and_then(|result| result), &mut state),
            Node::Suspend(thunk) => Step::Continue(guarded(thunk).unwrap_or_else(Node::RaiseError)),
            Node::Map {
                source, function, ..
            } => {
                state.stack.push(Frame::Map(function));
                Step::Continue(source.into_node())
            }
            Node::Bind { source, frame } => {
                state.stack.push(frame);
                Step::Continue(source.into_node())
            }
            Node::Uncancelable(source) => {
                let enclosing =
                    std::mem::replace(&mut state.connection, Connection::uncancelable());
                state.stack.push(Frame::Restore(enclosing));
                Step::Continue(source.into_node())
            }
            Node::Async(register) => match AsyncBoundary::suspend(register, state) {
                Suspended::Ready(result, resumed) => {
                    state = resumed;
                    Step::Continue(Node::from_result(result))
                }
                Suspended::Parked => return,
            },
        };

        match step {
            Step::Continue(next) => current = next,
            Step::Done(result) => {
                (state.callback)(result);
                return;
            }
        }
    }
}

/// Pops frames until one of them produces the next node.
///
/// Maps are applied in place; frames that do not match the result's path are
/// discarded. `Restore` frames apply on both paths and hand control back to
/// the loop, so the end of an uncancelable region is a cancellation point.
fn unwind(mut result: Result<Value, Error>, state: &mut LoopState) -> Step {
    loop {
        let Some(frame) = state.stack.pop() else {
            return Step::Done(result);
        };
        match (frame, result) {
            (Frame::Map(function), Ok(value)) => result = guarded(|| function(value)),
            (Frame::Bind(function) | Frame::Fold { on_success: function, .. }, Ok(value)) => {
                return Step::Continue(
                    guarded(|| function(value)).unwrap_or_else(Node::RaiseError),
                );
            }
            (Frame::Recover(handler) | Frame::Fold { on_error: handler, .. }, Err(error)) => {
                return Step::Continue(
                    guarded(|| handler(error)).unwrap_or_else(Node::RaiseError),
                );
            }
            (Frame::Restore(connection), unchanged) => {
                state.connection = connection;
                return Step::Continue(Node::from_result(unchanged));
            }
            (Frame::Recover(_), Ok(value)) => result = Ok(value),
            (Frame::Map(_) | Frame::Bind(_), Err(error)) => result = Err(error),
        }
    }
}

enum BoundaryState {
    Registering,
    Ready(Result<Value, Error>),
    Parked(LoopState),
    Resumed,
}

enum Suspended {
    Ready(Result<Value, Error>, LoopState),
    Parked,
}

/// Hand-off point between a suspended loop and the callback that resumes it.
struct AsyncBoundary {
    state: Mutex<BoundaryState>,
}

impl AsyncBoundary {
    fn suspend(register: Register, state: LoopState) -> Suspended {
        let boundary = Arc::new(Self {
            state: Mutex::new(BoundaryState::Registering),
        });
        let resume = Arc::clone(&boundary);
        let callback: RawCallback = Box::new(move |result| resume.complete(result));
        let connection = state.connection.clone();

        if let Err(error) = guarded(move || register(connection, callback)) {
            boundary.complete(Err(error));
        }

        let mut guard = boundary.state.lock();
        match std::mem::replace(&mut *guard, BoundaryState::Resumed) {
            BoundaryState::Ready(result) => Suspended::Ready(result, state),
            BoundaryState::Registering => {
                tracing::trace!("run loop parked at async boundary");
                *guard = BoundaryState::Parked(state);
                Suspended::Parked
            }
            BoundaryState::Parked(_) | BoundaryState::Resumed => {
                unreachable!("async boundary left the registering state twice")
            }
        }
    }

    fn complete(&self, result: Result<Value, Error>) {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, BoundaryState::Resumed) {
            BoundaryState::Registering => *guard = BoundaryState::Ready(result),
            BoundaryState::Parked(state) => {
                drop(guard);
                tracing::trace!("run loop resumed from async boundary");
                run(Node::from_result(result), state);
            }
            previous @ (BoundaryState::Ready(_) | BoundaryState::Resumed) => {
                *guard = previous;
                tracing::warn!("async step completed more than once; result dropped");
            }
        }
    }
}

/// A one-shot slot a blocked thread waits on.
pub struct Latch<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Latch<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.ready.notify_all();
    }

    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Waits at most `limit`; `None` if the slot is still empty.
    pub fn wait_for(&self, limit: Duration) -> Option<T> {
        let deadline = Instant::now() + limit;
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::io::algebra::{erase, unerase};

    fn run_to_result(node: Node) -> Result<i32, Error> {
        let latch = Latch::new();
        let sink = Arc::clone(&latch);
        start(node, Box::new(move |result| sink.set(result)));
        latch.wait().map(unerase::<i32>)
    }

    #[test]
    fn test_pure_completes() {
        assert_eq!(run_to_result(Node::Pure(erase(1_i32))).unwrap(), 1);
    }

    #[test]
    fn test_recover_skipped_on_success() {
        let node = Node::Pure(erase(2_i32))
            .bind(Frame::Recover(Box::new(|_| Node::Pure(erase(0_i32)))));
        assert_eq!(run_to_result(node).unwrap(), 2);
    }

    #[test]
    fn test_bind_skipped_on_error() {
        let node = Node::RaiseError(Error::msg("boom"))
            .bind(Frame::Bind(Box::new(|_| Node::Pure(erase(0_i32)))))
            .bind(Frame::Recover(Box::new(|_| Node::Pure(erase(9_i32)))));
        assert_eq!(run_to_result(node).unwrap(), 9);
    }

    #[test]
    fn test_cancelled_connection_stops_before_first_step() {
        let connection = Connection::new();
        connection.cancel().run_sync().unwrap();
        let latch = Latch::new();
        let sink = Arc::clone(&latch);
        start_cancelable(
            Node::Pure(erase(1_i32)),
            connection,
            Box::new(move |result| sink.set(result.map(unerase::<i32>))),
        );
        assert!(latch.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_synchronous_async_step_continues_in_place() {
        let node = Node::Async(Box::new(|_, callback| callback(Ok(erase(4_i32)))));
        assert_eq!(run_to_result(node).unwrap(), 4);
    }

    #[test]
    fn test_register_panic_is_raised() {
        let node = Node::Async(Box::new(|_, _| panic!("register")));
        assert!(run_to_result(node).unwrap_err().is_panic());
    }

    #[test]
    fn test_latch_wait_for_times_out() {
        let latch: Arc<Latch<()>> = Latch::new();
        assert!(latch.wait_for(Duration::from_millis(10)).is_none());
    }
}
