#![forbid(unsafe_code)]

//! Multicast notification source used by observable collaborators.
//!
//! [`EventSource<A>`] is the Rust shape of a "changed" event: handlers are
//! registered with [`subscribe`](EventSource::subscribe), identified by a
//! [`HandlerId`], and removed with [`unsubscribe`](EventSource::unsubscribe).
//!
//! # Invariants
//!
//! 1. Handlers are invoked in registration order.
//! 2. `raise` snapshots the handler list before invoking anything, so
//!    handlers may subscribe or unsubscribe (themselves or others) while a
//!    notification is being delivered without corrupting the list.
//! 3. A handler removed during delivery may still receive the in-flight
//!    notification; receivers guard against that with their own state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Shared handler callback.
pub type Handler<A> = Rc<dyn Fn(&A)>;

/// Identifies one registration on an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// A single-threaded multicast event.
pub struct EventSource<A: ?Sized> {
    handlers: RefCell<Vec<(HandlerId, Handler<A>)>>,
    next_id: Cell<u64>,
}

impl<A: ?Sized> Default for EventSource<A> {
    fn default() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }
}

impl<A: ?Sized> EventSource<A> {
    /// Create an event with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn subscribe(&self, handler: impl Fn(&A) + 'static) -> HandlerId {
        self.subscribe_rc(Rc::new(handler))
    }

    /// Register an already shared handler.
    pub fn subscribe_rc(&self, handler: Handler<A>) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        match handlers.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Invoke every registered handler with `args`.
    pub fn raise(&self, args: &A) {
        let snapshot: Vec<Handler<A>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(args);
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

impl<A: ?Sized> fmt::Debug for EventSource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
