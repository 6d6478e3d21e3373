//! The erased representation interpreted by the run loop.
//!
//! `IO<A>` is a typed shell around a [`Node`]. Values crossing a node boundary
//! are boxed as `Box<dyn Any + Send>` so that a `Bind` can hold a continuation
//! whose input type differs from its output type; the typed API guarantees
//! every downcast succeeds.
//!
//! # Invariants
//!
//! - A `Node` is pure data: building one never runs user code.
//! - `Map` nodes carry a fusion `index`; at most [`MAX_MAP_FUSION`] maps are
//!   composed into one closure before a new `Map` layer starts.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::super::connection::Connection;
use super::super::error::Error;

/// Number of consecutive `map` calls fused into a single closure.
pub const MAX_MAP_FUSION: usize = 31;

pub type Value = Box<dyn Any + Send>;

pub type RawCallback = Box<dyn FnOnce(Result<Value, Error>) + Send>;

pub type MapFn = Box<dyn FnOnce(Value) -> Value + Send>;

pub type BindFn = Box<dyn FnOnce(Value) -> Node + Send>;

pub type RecoverFn = Box<dyn FnOnce(Error) -> Node + Send>;

pub type Register = Box<dyn FnOnce(Connection, RawCallback) + Send>;

/// One node of an effect description.
pub enum Node {
    /// An already computed value.
    Pure(Value),
    /// An already known failure.
    RaiseError(Error),
    /// A synchronous thunk, run once on the interpreting thread.
    Delay(Box<dyn FnOnce() -> Result<Value, Error> + Send>),
    /// A thunk producing the next node to interpret.
    Suspend(Box<dyn FnOnce() -> Self + Send>),
    /// Hands a completion callback to external code.
    Async(Register),
    /// Sequencing: interpret `source`, then apply `frame`.
    Bind { source: Child, frame: Frame },
    /// Fused transformation of `source`.
    Map {
        source: Child,
        function: MapFn,
        index: usize,
    },
    /// Interpret `source` with cancellation disabled.
    Uncancelable(Child),
}

/// The boxed source of a `Bind`, `Map` or `Uncancelable` node.
///
/// Dropping a child releases the whole chain below it with a heap worklist,
/// so an unrun chain of any depth is freed in constant stack space.
pub struct Child(Option<Box<Node>>);

impl Child {
    pub fn new(node: Node) -> Self {
        Self(Some(Box::new(node)))
    }

    /// Takes the node out for interpretation.
    pub fn into_node(mut self) -> Node {
        match self.0.take() {
            Some(node) => *node,
            None => unreachable!("child node taken twice"),
        }
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        let Some(first) = self.0.take() else {
            return;
        };
        let mut pending = vec![first];
        while let Some(mut node) = pending.pop() {
            if let Node::Bind { source, .. } | Node::Map { source, .. } | Node::Uncancelable(source) =
                &mut *node
                && let Some(next) = source.0.take()
            {
                pending.push(next);
            }
        }
    }
}

/// A pending continuation on the run loop's call stack.
pub enum Frame {
    /// Transform a successful value.
    Map(MapFn),
    /// Continue with a new node after a successful value; skipped on error.
    Bind(BindFn),
    /// Recover from an error; skipped on success.
    Recover(RecoverFn),
    /// Continue on both paths.
    Fold {
        on_success: BindFn,
        on_error: RecoverFn,
    },
    /// End of an uncancelable region: restores the enclosing connection.
    Restore(Connection),
}

impl Node {
    /// Appends `function`, fusing it into an existing `Map` when possible.
    pub fn map(self, function: MapFn) -> Self {
        match self {
            Self::Map {
                source,
                function: previous,
                index,
            } if index < MAX_MAP_FUSION => Self::Map {
                source,
                function: Box::new(move |value| function(previous(value))),
                index: index + 1,
            },
            other => Self::Map {
                source: Child::new(other),
                function,
                index: 0,
            },
        }
    }

    pub fn bind(self, frame: Frame) -> Self {
        Self::Bind {
            source: Child::new(self),
            frame,
        }
    }

    pub fn from_result(result: Result<Value, Error>) -> Self {
        match result {
            Ok(value) => Self::Pure(value),
            Err(error) => Self::RaiseError(error),
        }
    }

    /// The fusion index of a `Map` node, or `None` for other variants.
    #[cfg(test)]
    pub fn map_index(&self) -> Option<usize> {
        match self {
            Self::Map { index, .. } => Some(*index),
            _ => None,
        }
    }
}

pub fn erase<A: Send + 'static>(value: A) -> Value {
    Box::new(value)
}

/// Recovers the typed value from its erased box.
///
/// # Panics
///
/// Panics if the box holds a different type; the typed `IO` API never
/// produces such a mismatch.
pub fn unerase<A: 'static>(value: Value) -> A {
    match value.downcast::<A>() {
        Ok(typed) => *typed,
        Err(_) => panic!("IO internal error: erased value has an unexpected type"),
    }
}

/// Runs a user closure, turning a panic into a raised error.
pub fn guarded<T>(function: impl FnOnce() -> T) -> Result<T, Error> {
    catch_unwind(AssertUnwindSafe(function))
        .map_err(|payload| Error::from_panic_payload(payload.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn increment() -> MapFn {
        Box::new(|value| erase(unerase::<i32>(value) + 1))
    }

    #[test]
    fn test_map_fuses_up_to_limit() {
        let mut node = Node::Pure(erase(0_i32));
        for _ in 0..=MAX_MAP_FUSION {
            node = node.map(increment());
        }
        assert_eq!(node.map_index(), Some(MAX_MAP_FUSION));
    }

    #[test]
    fn test_map_starts_new_layer_after_limit() {
        let mut node = Node::Pure(erase(0_i32));
        for _ in 0..=(MAX_MAP_FUSION + 1) {
            node = node.map(increment());
        }
        assert_eq!(node.map_index(), Some(0));
    }

    #[test]
    fn test_guarded_captures_panic() {
        let result: Result<(), Error> = guarded(|| panic!("inside"));
        assert_eq!(result.unwrap_err().to_string(), "panicked: inside");
    }

    #[test]
    fn test_dropping_deep_unrun_chain() {
        let mut node = Node::Pure(erase(0_i32));
        for _ in 0..500_000 {
            node = node.bind(Frame::Bind(Box::new(Node::Pure)));
        }
        drop(node);
    }

    #[test]
    fn test_unerase_round_trip() {
        assert_eq!(unerase::<String>(erase("x".to_string())), "x");
    }
}
