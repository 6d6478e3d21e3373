//! A write-once cell with listeners, holding a fiber's outcome.

use std::sync::Arc;

use parking_lot::Mutex;

use super::super::exit::Outcome;

type Listener<A> = Box<dyn FnOnce(Outcome<A>) + Send>;

enum State<A> {
    Pending {
        listeners: Vec<(u64, Listener<A>)>,
        next_id: u64,
    },
    Complete(Outcome<A>),
}

pub struct Promise<A> {
    state: Arc<Mutex<State<A>>>,
}

impl<A> Clone for Promise<A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: Clone> Promise<A> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending {
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Stores `outcome` and notifies every listener outside the lock.
    ///
    /// Returns `false` if the promise was already complete.
    pub fn complete(&self, outcome: Outcome<A>) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Complete(_) => return false,
                State::Pending { listeners, .. } => {
                    let listeners = std::mem::take(listeners);
                    *state = State::Complete(outcome.clone());
                    listeners
                }
            }
        };
        for (_, listener) in listeners {
            listener(outcome.clone());
        }
        true
    }

    /// Registers `listener`, or calls it at once if the outcome is known.
    ///
    /// Returns the listener id while it is pending.
    pub fn listen(&self, listener: Listener<A>) -> Option<u64> {
        let known = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending { listeners, next_id } => {
                    let id = *next_id;
                    *next_id += 1;
                    listeners.push((id, listener));
                    return Some(id);
                }
                State::Complete(outcome) => outcome.clone(),
            }
        };
        listener(known);
        None
    }

    pub fn remove(&self, id: u64) {
        if let State::Pending { listeners, .. } = &mut *self.state.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    pub fn get(&self) -> Option<Outcome<A>> {
        match &*self.state.lock() {
            State::Pending { .. } => None,
            State::Complete(outcome) => Some(outcome.clone()),
        }
    }
}
